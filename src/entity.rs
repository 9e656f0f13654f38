// ABOUTME: The six replicated entity kinds and their source/target naming
// ABOUTME: Defines the dependency order every sync pass must follow

use std::fmt;

/// An entity type replicated from the document store into the analytics tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Client,
    Agent,
    Service,
    TourPackage,
    Sale,
    SaleLine,
}

impl EntityKind {
    /// Order in which a pass processes entity kinds.
    ///
    /// Independent kinds come first, then `Sale` (needs client and agent keys),
    /// then `SaleLine` (needs sale, service and tour-package keys). Processing
    /// out of this order leaves foreign keys unresolved for that pass.
    pub const DEPENDENCY_ORDER: [EntityKind; 6] = [
        EntityKind::Client,
        EntityKind::Agent,
        EntityKind::Service,
        EntityKind::TourPackage,
        EntityKind::Sale,
        EntityKind::SaleLine,
    ];

    /// Name of the backing collection in the document store.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Client => "clientes",
            EntityKind::Agent => "agentes",
            EntityKind::Service => "servicios",
            EntityKind::TourPackage => "paquetesTuristicos",
            EntityKind::Sale => "ventas",
            EntityKind::SaleLine => "detalleVenta",
        }
    }

    /// Name of the relational table.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Client => "clientes",
            EntityKind::Agent => "agentes",
            EntityKind::Service => "servicios",
            EntityKind::TourPackage => "paquetes_turisticos",
            EntityKind::Sale => "ventas",
            EntityKind::SaleLine => "detalle_venta",
        }
    }

    /// Collection joined in as the `parent` document when reading this kind.
    ///
    /// Only person-like kinds carry their name and contact data on a separate
    /// user-account document.
    pub fn parent_collection(&self) -> Option<&'static str> {
        match self {
            EntityKind::Client | EntityKind::Agent => Some("usuarios"),
            _ => None,
        }
    }

    /// Kinds whose surrogate keys this kind references.
    pub fn dependencies(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Sale => &[EntityKind::Client, EntityKind::Agent],
            EntityKind::SaleLine => &[
                EntityKind::Sale,
                EntityKind::Service,
                EntityKind::TourPackage,
            ],
            _ => &[],
        }
    }

    /// Whether the upsert of this kind hands back its `origen_id -> id` map
    /// directly instead of relying on a table rescan.
    pub fn returns_identifier_map(&self) -> bool {
        matches!(self, EntityKind::Sale)
    }

    /// Resolve a change-notification namespace to an entity kind.
    ///
    /// Accepts the source collection name and, as an alias, the table name.
    pub fn from_collection(name: &str) -> Option<EntityKind> {
        Self::DEPENDENCY_ORDER
            .into_iter()
            .find(|kind| kind.collection() == name || kind.table() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}
