//! 驻留字符串
//!
//! `Name` 在整个进程中只保存一份文本，比较和哈希都只看指针。
//! RenderGraph 用它标识逻辑资源，`RenderContext` 用它标识命名管线。
//!
//! 名字末尾的 `+` 表示"该资源最近一次写入之后的版本"，
//! 这只是一个约定，`Name` 本身的相等性仍然是纯文本的，
//! 具体的版本解析由 RenderGraph 编译器完成。

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use lazy_static::lazy_static;
use parking_lot::RwLock;

lazy_static! {
    static ref NAME_TABLE: RwLock<HashSet<&'static str>> = RwLock::new(HashSet::new());
}

/// 驻留后的符号
#[derive(Clone, Copy)]
pub struct Name(&'static str);

// new & init
impl Name {
    /// 版本后缀标记
    pub const VERSION_MARKER: char = '+';

    pub fn new(text: &str) -> Self {
        if let Some(&interned) = NAME_TABLE.read().get(text) {
            return Self(interned);
        }

        let mut table = NAME_TABLE.write();
        // 拿到写锁之后需要再检查一次，其他线程可能已经插入
        if let Some(&interned) = table.get(text) {
            return Self(interned);
        }
        let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
        table.insert(leaked);
        Self(leaked)
    }
}
// getters
impl Name {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 末尾 `+` 的个数
    #[inline]
    pub fn version_suffix(&self) -> usize {
        self.0.len() - self.0.trim_end_matches(Self::VERSION_MARKER).len()
    }

    #[inline]
    pub fn is_versioned(&self) -> bool {
        self.0.ends_with(Self::VERSION_MARKER)
    }

    /// 去掉版本后缀之后的名字
    pub fn base(&self) -> Name {
        if self.is_versioned() { Name::new(self.0.trim_end_matches(Self::VERSION_MARKER)) } else { *self }
    }
}
// tools
impl Name {
    pub fn append(&self, suffix: &str) -> Name {
        let mut text = String::with_capacity(self.0.len() + suffix.len());
        text.push_str(self.0);
        text.push_str(suffix);
        Name::new(&text)
    }

    /// `X` -> `X+`
    pub fn versioned(&self) -> Name {
        let mut buf = [0u8; 4];
        self.append(Self::VERSION_MARKER.encode_utf8(&mut buf))
    }
}

impl PartialEq for Name {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr()) && self.0.len() == other.0.len()
    }
}
impl Eq for Name {}

impl Hash for Name {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
        self.0.len().hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(other.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<&String> for Name {
    fn from(value: &String) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_names_share_storage() {
        let a = Name::new("gbuffer.albedo");
        let b = Name::new(&String::from("gbuffer.albedo"));
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
        assert_ne!(a, Name::new("gbuffer.normal"));
    }

    #[test]
    fn version_suffix_is_textual() {
        let x = Name::new("X");
        let x1 = x.versioned();
        assert_eq!(x1.as_str(), "X+");
        assert_ne!(x, x1);
        assert_eq!(x1.version_suffix(), 1);
        assert_eq!(x1.versioned().version_suffix(), 2);
        assert_eq!(x1.versioned().base(), x);
        assert_eq!(x.base(), x);
        assert!(!x.is_versioned());
    }

    #[test]
    fn ordering_follows_text() {
        let mut names = vec![Name::new("c"), Name::new("a"), Name::new("b")];
        names.sort();
        let texts: Vec<_> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn concurrent_interning_yields_one_symbol() {
        let names: Vec<Name> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| Name::new("shared.resource"))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(names.windows(2).all(|w| w[0] == w[1]));
    }
}
