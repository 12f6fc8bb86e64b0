use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::pos::{PosCategory, PosFullProduct, PosInventory, PosProduct};
use crate::store::models::{Category, InventoryLevel, Product};

pub fn category_from_pos(row: PosCategory, synced_at: DateTime<Utc>) -> Category {
    Category {
        external_id: row.id,
        name: row.name,
        parent_external_id: row.parent_id,
        synced_at,
    }
}

pub fn product_from_pos(row: PosProduct, synced_at: DateTime<Utc>) -> Product {
    Product {
        external_id: row.id,
        sku: row.sku,
        name: row.name,
        price_cents: row.price_cents,
        category_external_id: row.category_id,
        synced_at,
    }
}

pub fn inventory_from_pos(row: PosInventory, synced_at: DateTime<Utc>) -> InventoryLevel {
    InventoryLevel {
        product_external_id: row.product_id,
        quantity: row.quantity,
        synced_at,
    }
}

/// A consolidated record upserts both the product and its stock level under
/// the same external id, so re-runs stay idempotent.
pub fn full_product_rows(
    row: PosFullProduct,
    synced_at: DateTime<Utc>,
) -> (Product, InventoryLevel) {
    let inventory = InventoryLevel {
        product_external_id: row.id.clone(),
        quantity: row.quantity,
        synced_at,
    };
    let product = Product {
        external_id: row.id,
        sku: row.sku,
        name: row.name,
        price_cents: row.price_cents,
        category_external_id: row.category_id,
        synced_at,
    };
    (product, inventory)
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

/// Nest synced categories under their parents by external id.
///
/// Pure function over the synced rows. A category whose parent id matches no
/// synced row is an orphan: logged and placed at top level, never an error.
/// Members of a parent cycle are unreachable from any root and are surfaced
/// flat at top level for the same reason.
pub fn build_category_tree(rows: Vec<Category>) -> Vec<CategoryNode> {
    let known: HashSet<String> = rows.iter().map(|c| c.external_id.clone()).collect();

    let mut children_of: HashMap<String, Vec<Category>> = HashMap::new();
    let mut roots: Vec<Category> = Vec::new();
    for row in rows {
        match row.parent_external_id.clone() {
            Some(parent) if parent != row.external_id && known.contains(&parent) => {
                children_of.entry(parent).or_default().push(row);
            }
            Some(parent) => {
                warn!(
                    category = %row.external_id,
                    parent = %parent,
                    "category parent not found; placing at top level"
                );
                roots.push(row);
            }
            None => roots.push(row),
        }
    }

    fn attach(category: Category, children_of: &mut HashMap<String, Vec<Category>>) -> CategoryNode {
        let mut kids = children_of
            .remove(&category.external_id)
            .unwrap_or_default();
        kids.sort_by(|a, b| a.name.cmp(&b.name));
        CategoryNode {
            children: kids
                .into_iter()
                .map(|k| attach(k, children_of))
                .collect(),
            category,
        }
    }

    roots.sort_by(|a, b| a.name.cmp(&b.name));
    let mut nodes: Vec<CategoryNode> = roots
        .into_iter()
        .map(|r| attach(r, &mut children_of))
        .collect();

    if !children_of.is_empty() {
        let mut leftovers: Vec<Category> = children_of.drain().flat_map(|(_, v)| v).collect();
        leftovers.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        for row in leftovers {
            warn!(category = %row.external_id, "category unreachable from any root; placing at top level");
            nodes.push(CategoryNode {
                category: row,
                children: Vec::new(),
            });
        }
    }

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str, name: &str, parent: Option<&str>) -> Category {
        Category {
            external_id: id.to_string(),
            name: name.to_string(),
            parent_external_id: parent.map(str::to_string),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_tree_nests_children_under_parents() {
        let rows = vec![
            category("c1", "Drinks", None),
            category("c2", "Coffee", Some("c1")),
            category("c3", "Tea", Some("c1")),
            category("c4", "Espresso", Some("c2")),
        ];

        let tree = build_category_tree(rows);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].category.name, "Drinks");
        assert_eq!(tree[0].children.len(), 2);
        assert_eq!(tree[0].children[0].category.name, "Coffee");
        assert_eq!(tree[0].children[0].children[0].category.name, "Espresso");
    }

    #[test]
    fn test_orphans_surface_at_top_level() {
        let rows = vec![
            category("c1", "Drinks", None),
            category("c2", "Lost", Some("gone")),
        ];

        let tree = build_category_tree(rows);
        assert_eq!(tree.len(), 2);
        let names: Vec<&str> = tree.iter().map(|n| n.category.name.as_str()).collect();
        assert!(names.contains(&"Lost"));
    }

    #[test]
    fn test_cycle_members_do_not_vanish() {
        let rows = vec![
            category("c1", "A", Some("c2")),
            category("c2", "B", Some("c1")),
            category("c3", "Root", None),
        ];

        let tree = build_category_tree(rows);
        let mut names: Vec<&str> = tree.iter().map(|n| n.category.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["A", "B", "Root"]);
    }

    #[test]
    fn test_self_parent_is_treated_as_orphan() {
        let rows = vec![category("c1", "Selfie", Some("c1"))];
        let tree = build_category_tree(rows);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn test_full_product_rows_share_external_id() {
        let (product, inventory) = full_product_rows(
            PosFullProduct {
                id: "p1".into(),
                sku: "SKU-1".into(),
                name: "Widget".into(),
                price_cents: 500,
                category_id: None,
                quantity: 12,
            },
            Utc::now(),
        );
        assert_eq!(product.external_id, inventory.product_external_id);
        assert_eq!(inventory.quantity, 12);
    }
}
