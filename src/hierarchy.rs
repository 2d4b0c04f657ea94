use std::collections::{HashMap, HashSet};

use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::dialect::Row;
use crate::error::DwcaError;
use crate::names::{NameParser, ParserPool};
use crate::pipeline::{CancelToken, Pipeline};
use crate::taxon::TaxonLocator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyNode {
    pub id: String,
    pub parent_id: String,
    pub accepted_id: String,
    pub name: String,
    pub rank: String,
}

/// Pipe-joined ancestor chain, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Breadcrumbs {
    pub names: String,
    pub ranks: String,
    pub ids: String,
}

impl Breadcrumbs {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.names.is_empty()
    }

    pub fn into_fields(self) -> [String; 3] {
        [self.names, self.ranks, self.ids]
    }
}

/// Taxonomy tree keyed by taxon id.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    nodes: HashMap<String, HierarchyNode>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams the core file through the worker pool once. Only the sink
    /// touches the map.
    pub fn build<P, F>(
        produce: F,
        locator: &TaxonLocator,
        id_index: Option<usize>,
        pool: &ParserPool<P>,
        jobs: usize,
        cancel: &CancelToken,
    ) -> Result<Self, DwcaError>
    where
        P: NameParser + Send,
        F: FnOnce(&Sender<Row>, &CancelToken) -> Result<u64, DwcaError>,
    {
        let mut hierarchy = Self::new();
        let mut pipeline = Pipeline::new("hierarchy", jobs, cancel.clone());
        pipeline.run(
            produce,
            || {
                let mut parser = pool.checkout()?;
                Ok(move |row: Row| Ok(node_from_row(&mut *parser, locator, id_index, &row)))
            },
            |node: Option<HierarchyNode>| {
                if let Some(node) = node {
                    hierarchy.insert(node);
                }
                Ok(())
            },
        )?;
        info!(nodes = hierarchy.len(), "hierarchy built");
        Ok(hierarchy)
    }

    /// Nodes with an empty id are ignored.
    pub fn insert(&mut self, node: HierarchyNode) {
        if node.id.is_empty() {
            return;
        }
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &str) -> Option<&HierarchyNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walks from `id` to the root. Synonyms without a parent are replaced
    /// by their accepted name. A missing ancestor or a repeated id ends the
    /// walk with what has been collected so far.
    pub fn breadcrumbs(&self, id: &str) -> Breadcrumbs {
        let mut chain: Vec<&HierarchyNode> = Vec::new();
        let mut visited = HashSet::new();
        let mut current = id.trim().to_string();

        while !current.is_empty() {
            if !visited.insert(current.clone()) {
                warn!(id = %current, "cycle in hierarchy, cutting breadcrumbs");
                break;
            }
            let Some(node) = self.nodes.get(&current) else {
                warn!(id = %current, "hierarchy node not found, making short breadcrumbs");
                break;
            };
            if node.parent_id.is_empty() && !node.accepted_id.is_empty() {
                current = node.accepted_id.clone();
                continue;
            }
            chain.push(node);
            if node.parent_id == current {
                break;
            }
            current = node.parent_id.clone();
        }

        chain.reverse();
        let join = |field: fn(&HierarchyNode) -> &str| {
            chain.iter().map(|node| field(node)).collect::<Vec<_>>().join("|")
        };
        Breadcrumbs {
            names: join(|node| node.name.as_str()),
            ranks: join(|node| node.rank.as_str()),
            ids: join(|node| node.id.as_str()),
        }
    }
}

impl FromIterator<HierarchyNode> for Hierarchy {
    fn from_iter<I: IntoIterator<Item = HierarchyNode>>(iter: I) -> Self {
        let mut hierarchy = Self::new();
        for node in iter {
            hierarchy.insert(node);
        }
        hierarchy
    }
}

/// Node for one core row, or `None` when the row has no id.
pub fn node_from_row(
    parser: &mut dyn NameParser,
    locator: &TaxonLocator,
    id_index: Option<usize>,
    row: &[String],
) -> Option<HierarchyNode> {
    let id = id_index
        .and_then(|index| row.get(index))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())?
        .to_string();

    let (verbatim, _) = locator.name_and_authorship(row);
    let parsed = parser.parse(&verbatim);
    let name = if parsed.parsed && !parsed.canonical_simple.is_empty() {
        parsed.canonical_simple
    } else {
        verbatim
    };

    let mut parent_id = locator.parent(row);
    if parent_id == id {
        parent_id.clear();
    }
    let mut accepted_id = locator.accepted(row);
    if accepted_id == id {
        accepted_id.clear();
    }

    Some(HierarchyNode {
        rank: locator.rank(row),
        id,
        parent_id,
        accepted_id,
        name,
    })
}
