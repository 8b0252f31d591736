use ash::vk;

/// 调用方违反前置条件时产生的错误
///
/// 这些错误都代表调用方的 bug，manager 会打印日志后直接 panic；
/// 纯函数形式的校验器返回这个类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GfxError {
    #[error("range out of bounds: base {base} + count {count} > total {total}")]
    RangeOutOfBounds { base: u32, count: u32, total: u32 },

    #[error("buffer range out of bounds: offset {offset} + size {size} > buffer size {total}")]
    BufferRangeOutOfBounds { offset: u64, size: u64, total: u64 },

    #[error("buffer `{0}` is not host mapped")]
    BufferNotMapped(String),

    #[error("cube image requires array layers to be a multiple of 6, got {0}")]
    CubeLayerCount(u32),

    #[error("3D image can not have {0} array layers")]
    VolumeArray(u32),

    #[error("mip level count {mips} is invalid for extent {width}x{height}x{depth}")]
    InvalidMipCount { mips: u32, width: u32, height: u32, depth: u32 },

    #[error("attachment extent mismatch: {expected:?} vs {found:?}")]
    AttachmentExtentMismatch { expected: vk::Extent2D, found: vk::Extent2D },

    #[error("render target has no attachment")]
    EmptyRenderTarget,

    #[error("descriptor binding {0} is not declared in the layout")]
    UnknownBinding(u32),

    #[error("descriptor binding {binding}: array element {element} exceeds descriptor count {count}")]
    ArrayElementOutOfBounds { binding: u32, element: u32, count: u32 },

    #[error("descriptor binding {0}: exactly one of buffer info or image info must be supplied")]
    AmbiguousDescriptorWrite(u32),

    #[error("descriptor binding {binding}: {ty:?} does not accept {kind} info")]
    DescriptorKindMismatch { binding: u32, ty: vk::DescriptorType, kind: &'static str },

    #[error("blit layer count mismatch: src {src} vs dst {dst}")]
    BlitLayerMismatch { src: u32, dst: u32 },

    #[error("format {0:?} does not support linear filtering")]
    LinearFilterUnsupported(vk::Format),

    #[error("command list {name} is {state}, expected {expected}")]
    InvalidCommandState { name: String, state: &'static str, expected: &'static str },

    #[error("command list {name} targets queue family {list_family}, but was submitted to family {queue_family}")]
    WrongQueueFamily { name: String, list_family: u32, queue_family: u32 },
}

pub trait GfxResultExt<T> {
    /// 前置条件不满足时记录日志并 panic
    fn or_fatal(self, context: &str) -> T;
}

impl<T> GfxResultExt<T> for Result<T, GfxError> {
    #[track_caller]
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!("{context}: {err}");
                panic!("{context}: {err}");
            }
        }
    }
}

/// 检查 `[base, base + count)` 是否落在 `[0, total)` 之内
pub fn validate_range(base: u32, count: u32, total: u32) -> Result<(), GfxError> {
    match base.checked_add(count) {
        Some(end) if end <= total => Ok(()),
        _ => Err(GfxError::RangeOutOfBounds { base, count, total }),
    }
}

pub fn validate_buffer_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    total: vk::DeviceSize,
) -> Result<(), GfxError> {
    match offset.checked_add(size) {
        Some(end) if end <= total => Ok(()),
        _ => Err(GfxError::BufferRangeOutOfBounds {
            offset,
            size,
            total,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_range() {
        for total in 0..6u32 {
            for base in 0..8u32 {
                for count in 0..8u32 {
                    let result = validate_range(base, count, total);
                    assert_eq!(result.is_ok(), base + count <= total, "{base} {count} {total}");
                    // 相同的输入总是得到相同的结果
                    assert_eq!(result, validate_range(base, count, total));
                }
            }
        }
    }

    #[test]
    fn test_validate_range_overflow() {
        assert_eq!(
            validate_range(u32::MAX, 2, 4),
            Err(GfxError::RangeOutOfBounds {
                base: u32::MAX,
                count: 2,
                total: 4
            })
        );
    }

    #[test]
    fn test_validate_buffer_range() {
        assert!(validate_buffer_range(0, 256, 256).is_ok());
        assert!(validate_buffer_range(128, 129, 256).is_err());
        assert!(validate_buffer_range(u64::MAX, 1, 256).is_err());
    }

    #[test]
    #[should_panic(expected = "image barrier: range out of bounds")]
    fn test_or_fatal_panics() {
        validate_range(3, 2, 4).or_fatal("image barrier");
    }
}
