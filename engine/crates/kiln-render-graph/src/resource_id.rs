use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64
pub const fn hash_name(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// 渲染图资源的逻辑名称
///
/// 比较与排序只依赖名称的 hash，名称本身仅用于诊断输出。
#[derive(Clone, Debug)]
pub struct ResourceId {
    id: u64,
    name: Arc<str>,
}

impl ResourceId {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self {
            id: hash_name(name),
            name: Arc::from(name),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 创建该资源的一个 view
    #[inline]
    pub fn create_view(&self, view_name: impl AsRef<str>) -> ResourceViewId {
        ResourceViewId::from_resource(self.clone(), view_name)
    }
}

impl PartialEq for ResourceId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ResourceId {}

impl Hash for ResourceId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ResourceId {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ResourceId {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for ResourceId {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// 某个 Pass 对资源的一次具体访问
///
/// 同一个资源可以有多个 view，例如 `GBufferAlbedo` 被 GBufferPass 写入、被 DebugPass 读取。
#[derive(Clone, Debug)]
pub struct ResourceViewId {
    resource: ResourceId,
    view: u64,
    view_name: Arc<str>,
}

impl ResourceViewId {
    pub fn new(resource_name: impl AsRef<str>, view_name: impl AsRef<str>) -> Self {
        Self::from_resource(ResourceId::new(resource_name), view_name)
    }

    pub fn from_resource(resource: ResourceId, view_name: impl AsRef<str>) -> Self {
        let view_name = view_name.as_ref();
        Self {
            resource,
            view: hash_name(view_name),
            view_name: Arc::from(view_name),
        }
    }

    #[inline]
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    #[inline]
    pub fn view(&self) -> u64 {
        self.view
    }

    #[inline]
    pub fn view_name(&self) -> &str {
        &self.view_name
    }
}

impl PartialEq for ResourceViewId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.view == other.view
    }
}
impl Eq for ResourceViewId {}

impl Hash for ResourceViewId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource.hash(state);
        self.view.hash(state);
    }
}

impl PartialOrd for ResourceViewId {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ResourceViewId {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.resource.cmp(&other.resource).then(self.view.cmp(&other.view))
    }
}

impl Display for ResourceViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.resource, self.view_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_by_name() {
        let a = ResourceId::new("Albedo");
        let b = ResourceId::from("Albedo");
        assert_eq!(a, b);
        assert_ne!(a, ResourceId::new("Final"));
        assert_eq!(a.id(), hash_name("Albedo"));
    }

    #[test]
    fn test_views_of_same_resource() {
        let albedo = ResourceId::new("Albedo");
        let written = albedo.create_view("GBufferPass");
        let read = ResourceViewId::new("Albedo", "DebugPass");

        assert_eq!(written.resource(), read.resource());
        assert_ne!(written, read);
        assert_eq!(written, albedo.create_view("GBufferPass"));
        assert_eq!(read.to_string(), "Albedo::DebugPass");
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(hash_name(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(hash_name("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
