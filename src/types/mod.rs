use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Stable identifier of an indexable entity (an action, a file, a class, a symbol).
///
/// Entity IDs are produced by the host's extractor and treated as opaque here.
/// Backed by `Arc<str>` so they can be cloned into search results and queue
/// tasks without copying the underlying text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(Arc<str>);

impl EntityId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a source unit (typically a file path) whose contents
/// contribute entities to an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(Arc<str>);

impl UnitId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of domain item an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Action,
    File,
    Class,
    Symbol,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Action => "action",
            EntityKind::File => "file",
            EntityKind::Class => "class",
            EntityKind::Symbol => "symbol",
        }
    }
}

impl FromStr for EntityKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(EntityKind::Action),
            "file" => Ok(EntityKind::File),
            "class" => Ok(EntityKind::Class),
            "symbol" => Ok(EntityKind::Symbol),
            _ => Err("Unknown entity kind"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new("com.example.Action");
        assert_eq!(id.as_str(), "com.example.Action");
        assert_eq!(id.to_string(), "com.example.Action");
    }

    #[test]
    fn test_id_equality_and_hash() {
        let id1 = EntityId::new("openFile");
        let id2 = EntityId::new("openFile");
        let id3 = EntityId::new("closeFile");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);

        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(id1);
        assert!(set.contains(&id2));
        assert!(!set.contains(&id3));
    }

    #[test]
    fn test_id_ordering_is_lexicographic() {
        let a = EntityId::new("alpha");
        let b = EntityId::new("beta");
        assert!(a < b);
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("class".parse::<EntityKind>().unwrap(), EntityKind::Class);
        assert!("widget".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::Symbol.as_str(), "symbol");
    }
}
