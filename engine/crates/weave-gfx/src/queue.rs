use std::fmt;

/// 命令执行所在的队列
///
/// 同一个资源在不同 domain 之间传递时，需要显式的 queue family ownership transfer。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueDomain {
    #[default]
    Graphics,
    Compute,
    Transfer,
}

impl QueueDomain {
    pub const ALL: [QueueDomain; 3] = [QueueDomain::Graphics, QueueDomain::Compute, QueueDomain::Transfer];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueueDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueDomain::Graphics => "graphics",
            QueueDomain::Compute => "compute",
            QueueDomain::Transfer => "transfer",
        };
        f.write_str(name)
    }
}
