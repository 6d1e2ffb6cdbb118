//! Static tables: operation → entity types → namespaces → key patterns.

use finboard_core::Namespace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Invoice,
    Payment,
    Client,
    Expense,
    Budget,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Invoice,
        EntityType::Payment,
        EntityType::Client,
        EntityType::Expense,
        EntityType::Budget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Invoice => "invoice",
            EntityType::Payment => "payment",
            EntityType::Client => "client",
            EntityType::Expense => "expense",
            EntityType::Budget => "budget",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResolution {
    pub entity_types: BTreeSet<EntityType>,
    /// False when the operation was not in the table and resolved to every
    /// entity type.
    pub known: bool,
}

fn operation_entities(operation: &str) -> Option<&'static [EntityType]> {
    use EntityType::*;
    let entities: &'static [EntityType] = match operation {
        "invoice_created" | "invoice_updated" | "invoice_deleted" | "invoice_status_changed" => {
            &[Invoice]
        }
        // Payments move invoice balances.
        "payment_registered" | "payment_deleted" => &[Payment, Invoice],
        "client_created" | "client_updated" | "client_deleted" => &[Client],
        "expense_created" | "expense_updated" | "expense_deleted" => &[Expense],
        "budget_updated" => &[Budget],
        "bulk_import" => &[Invoice, Payment, Client, Expense],
        _ => return None,
    };
    Some(entities)
}

/// Unknown operations invalidate everything rather than nothing.
pub fn resolve_operation(operation: &str) -> OperationResolution {
    match operation_entities(operation) {
        Some(entities) => OperationResolution {
            entity_types: entities.iter().copied().collect(),
            known: true,
        },
        None => OperationResolution {
            entity_types: EntityType::ALL.into_iter().collect(),
            known: false,
        },
    }
}

/// Entity type → namespaces whose cached results depend on it.
#[derive(Debug, Clone)]
pub struct NamespaceDependencyMap {
    dependencies: BTreeMap<EntityType, BTreeSet<Namespace>>,
}

impl NamespaceDependencyMap {
    pub fn empty() -> Self {
        Self {
            dependencies: BTreeMap::new(),
        }
    }

    pub fn with_dependency(mut self, entity: EntityType, namespace: Namespace) -> Self {
        self.dependencies.entry(entity).or_default().insert(namespace);
        self
    }

    pub fn namespaces_for(&self, entity: EntityType) -> BTreeSet<Namespace> {
        self.dependencies.get(&entity).cloned().unwrap_or_default()
    }

    /// Union of the namespaces every given entity type affects.
    pub fn resolve<'a>(&self, entities: impl IntoIterator<Item = &'a EntityType>) -> BTreeSet<Namespace> {
        entities
            .into_iter()
            .flat_map(|entity| self.namespaces_for(*entity))
            .collect()
    }
}

impl Default for NamespaceDependencyMap {
    fn default() -> Self {
        let table: [(EntityType, &[Namespace]); 5] = [
            (
                EntityType::Invoice,
                &[
                    Namespace::DASHBOARD,
                    Namespace::KPIS,
                    Namespace::AGING,
                    Namespace::FORECAST,
                    Namespace::CASHFLOW,
                    Namespace::CLIENTS,
                ],
            ),
            (
                EntityType::Payment,
                &[
                    Namespace::DASHBOARD,
                    Namespace::KPIS,
                    Namespace::AGING,
                    Namespace::FORECAST,
                    Namespace::CASHFLOW,
                ],
            ),
            (
                EntityType::Client,
                &[Namespace::DASHBOARD, Namespace::AGING, Namespace::CLIENTS],
            ),
            (
                EntityType::Expense,
                &[
                    Namespace::DASHBOARD,
                    Namespace::KPIS,
                    Namespace::FORECAST,
                    Namespace::CASHFLOW,
                    Namespace::EXPENSES,
                ],
            ),
            (EntityType::Budget, &[Namespace::KPIS, Namespace::FORECAST]),
        ];
        table
            .into_iter()
            .fold(Self::empty(), |map, (entity, namespaces)| {
                namespaces
                    .iter()
                    .fold(map, |map, ns| map.with_dependency(entity, ns.clone()))
            })
    }
}

/// Declared namespaces and the key patterns that cover each one.
#[derive(Debug, Clone)]
pub struct NamespaceCatalog {
    patterns: BTreeMap<Namespace, Vec<String>>,
}

impl NamespaceCatalog {
    pub fn new(namespaces: impl IntoIterator<Item = Namespace>) -> Self {
        let patterns = namespaces
            .into_iter()
            .map(|ns| {
                let pattern = ns.pattern();
                (ns, vec![pattern])
            })
            .collect();
        Self { patterns }
    }

    /// Add an extra pattern for a namespace, declaring it if needed.
    pub fn with_pattern(mut self, namespace: Namespace, pattern: impl Into<String>) -> Self {
        self.patterns.entry(namespace).or_default().push(pattern.into());
        self
    }

    pub fn patterns_for(&self, namespace: &Namespace) -> Vec<String> {
        self.patterns
            .get(namespace)
            .cloned()
            .unwrap_or_else(|| vec![namespace.pattern()])
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.patterns.keys()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for NamespaceCatalog {
    fn default() -> Self {
        Self::new(Namespace::ALL)
    }
}
