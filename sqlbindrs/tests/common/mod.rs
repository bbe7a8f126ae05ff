//! Binding catalog shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use sqlbind::bindings::{BindingItem, BindingSet, BindingSetGroup, SubjectFilterType};
use sqlbind::catalog::BindingCatalog;
use sqlbind::subject_filters::{Connective, FilterNode, SubjectFilter, SubjectFilters};
use sqlbind::{SqlEngine, StaticSubject, Subject};

pub fn item(column: &str) -> BindingItem {
    BindingItem::column(column)
}

pub fn binding_set(
    name: &str,
    table: &str,
    read_permission: Option<&str>,
    items: &[(&str, BindingItem)],
) -> BindingSet {
    BindingSet {
        name: name.to_string(),
        table: table.to_string(),
        read_permission: read_permission.map(str::to_string),
        items: items
            .iter()
            .map(|(id, item)| (id.to_string(), item.clone()))
            .collect(),
        subject_filters: None,
        description: None,
    }
}

/// Sets:
/// - `sales_country` / `sales_city` behind the group `sales`
/// - `geo`, a country/region/city dimension readable with `geo:read`
/// - `orders_basic` / `orders_regional` behind the group `orders`, filtered by `region`
pub fn catalog() -> BindingCatalog {
    let mut margin = item("revenue_eur - cost_eur");
    margin.read_permission = Some("sales:margin".to_string());

    let sales_country = binding_set(
        "sales_country",
        "dwh_sales_country",
        Some("sales:read"),
        &[
            ("country", item("country_code")),
            ("year", item("sales_year")),
            ("revenue", item("revenue_eur")),
        ],
    );
    let sales_city = binding_set(
        "sales_city",
        "dwh_sales_city",
        Some("sales:read"),
        &[
            ("country", item("country_code")),
            ("region", item("region_code")),
            ("city", item("city_name")),
            ("year", item("sales_year")),
            ("revenue", item("revenue_eur")),
            ("margin", margin),
        ],
    );
    let geo = binding_set(
        "geo",
        "dim_geo",
        Some("geo:read"),
        &[
            ("country", item("country_code")),
            ("country_name", item("country_name")),
            ("region", item("region_code")),
            ("region_name", item("region_name")),
            ("city", item("city_code")),
            ("city_name", item("city_name")),
        ],
    );
    let orders_basic = binding_set(
        "orders_basic",
        "orders",
        None,
        &[("id", item("order_id")), ("amount", item("amount"))],
    );
    let orders_regional = binding_set(
        "orders_regional",
        "orders_by_region",
        None,
        &[
            ("id", item("order_id")),
            ("amount", item("amount")),
            ("region", item("region_code")),
        ],
    );

    let groups = vec![
        BindingSetGroup {
            name: "sales".to_string(),
            members: vec!["sales_country".to_string(), "sales_city".to_string()],
            subject_filters: None,
            description: None,
        },
        BindingSetGroup {
            name: "orders".to_string(),
            members: vec!["orders_basic".to_string(), "orders_regional".to_string()],
            subject_filters: Some(SubjectFilters::new(Connective::And(vec![
                FilterNode::Filter(SubjectFilter {
                    filter_type: "region".to_string(),
                }),
            ]))),
            description: None,
        },
    ];
    let filter_types = vec![SubjectFilterType {
        name: "region".to_string(),
        item: "region".to_string(),
        session_attribute: Some("allowed_region".to_string()),
        description: None,
    }];

    let catalog = BindingCatalog::from_parts(
        vec![sales_country, sales_city, geo, orders_basic, orders_regional],
        groups,
        filter_types,
    );
    catalog.validate().expect("fixture catalog is valid");
    catalog
}

pub fn engine() -> SqlEngine {
    SqlEngine::new(Arc::new(catalog()))
}

/// Reads sales and geo; restricted on the `region` subject filter.
pub fn analyst() -> Arc<dyn Subject> {
    Arc::new(
        StaticSubject::new()
            .with_permission("sales:read")
            .with_permission("geo:read"),
    )
}
