//! Integration tests for the hierarchical suggest query builder.

mod common;

use std::sync::Arc;

use serde_json::json;
use sqlbind::config::EngineConfig;
use sqlbind::generators::{
    SuggestColumn, SuggestHierarchy, SuggestQueryBuilder, SuggestRequest,
};
use sqlbind::{SqlBindError, SqlEngine};

use common::{analyst, catalog, engine};

fn geo_hierarchy() -> SuggestHierarchy {
    SuggestHierarchy::from_yaml(
        r#"
binding_set: geo
levels:
  - id: country
    caption: country_name
  - id: region
    caption: region_name
    requires: country
  - id: city
    caption: city_name
    requires: region
"#,
    )
    .unwrap()
}

fn request(search: &str) -> SuggestRequest {
    SuggestRequest {
        search: search.to_string(),
        level_separator: Some('/'),
        captions: false,
    }
}

fn columns(query: &sqlbind::generators::SuggestQuery) -> Vec<(usize, &str, Option<&str>)> {
    query
        .columns
        .iter()
        .map(|c| (c.position, c.item.as_str(), c.caption_for.as_deref()))
        .collect()
}

#[test]
fn empty_search_emits_only_the_first_level() {
    let engine = engine();
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &request(""), analyst())
        .unwrap();

    assert_eq!(
        query.statement.sql,
        "SELECT t1.country_code, NULL, NULL FROM dim_geo t1 \
         WHERE t1.country_code IS NOT NULL GROUP BY t1.country_code"
    );
    assert!(!query.statement.sql.contains("UNION ALL"));
    assert!(query.statement.params.is_empty());
    assert_eq!(
        columns(&query),
        vec![(1, "country", None), (2, "region", None), (3, "city", None)]
    );
}

#[test]
fn two_level_search_skips_shallow_levels() {
    let engine = engine();
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &request("Germany/Berlin"), analyst())
        .unwrap();
    let sql = &query.statement.sql;

    let branches: Vec<&str> = sql.split(" UNION ALL ").collect();
    assert_eq!(branches.len(), 2, "country level must be skipped: {sql}");

    assert_eq!(
        branches[0],
        "SELECT t1.country_code, t1.region_code, NULL FROM dim_geo t1 \
         WHERE t1.region_code IS NOT NULL \
         AND (LOWER(t1.country_code) = ?) \
         AND (LOWER(t1.region_code) LIKE ? ESCAPE '\\') \
         GROUP BY t1.country_code, t1.region_code"
    );
    assert_eq!(
        branches[1],
        "SELECT t1.country_code, t1.region_code, t1.city_code FROM dim_geo t1 \
         WHERE t1.city_code IS NOT NULL \
         AND ((LOWER(t1.country_code) = ?) OR (LOWER(t1.region_code) = ?)) \
         AND ((LOWER(t1.region_code) LIKE ? ESCAPE '\\') OR (LOWER(t1.city_code) LIKE ? ESCAPE '\\')) \
         GROUP BY t1.country_code, t1.region_code, t1.city_code"
    );
    assert_eq!(
        query.statement.params,
        vec![
            json!("germany"),
            json!("%berlin%"),
            json!("germany"),
            json!("germany"),
            json!("%berlin%"),
            json!("%berlin%"),
        ]
    );
    assert_eq!(sql.matches('?').count(), query.statement.params.len());
}

#[test]
fn single_token_searches_every_level() {
    let engine = engine();
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &request("ber"), analyst())
        .unwrap();

    assert_eq!(query.statement.sql.matches(" UNION ALL ").count(), 2);
    // A single token may match any level of the branch.
    assert!(query.statement.sql.contains(
        "((LOWER(t1.country_code) LIKE ? ESCAPE '\\') OR (LOWER(t1.region_code) LIKE ? ESCAPE '\\') \
         OR (LOWER(t1.city_code) LIKE ? ESCAPE '\\'))"
    ));
    assert_eq!(query.statement.params.len(), 1 + 2 + 3);
}

#[test]
fn captions_follow_their_level_and_take_the_match() {
    let engine = engine();
    let mut req = request("Germany/Berlin");
    req.captions = true;
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &req, analyst())
        .unwrap();

    assert_eq!(
        columns(&query),
        vec![
            (1, "country", None),
            (2, "country_name", Some("country")),
            (3, "region", None),
            (4, "region_name", Some("region")),
            (5, "city", None),
            (6, "city_name", Some("city")),
        ]
    );
    let city_branch = query.statement.sql.split(" UNION ALL ").nth(1).unwrap();
    assert!(city_branch.contains("(LOWER(t1.city_name) LIKE ? ESCAPE '\\')"));
    assert!(city_branch.contains("(LOWER(t1.country_name) = ?)"));
    assert!(!city_branch.contains("LOWER(t1.city_code)"));
    assert!(city_branch.ends_with(
        "GROUP BY t1.country_code, t1.country_name, t1.region_code, t1.region_name, \
         t1.city_code, t1.city_name"
    ));
}

#[test]
fn configured_separator_applies_when_request_has_none() {
    let mut config = EngineConfig::default();
    config.suggest.level_separator = Some('>');
    let engine = SqlEngine::with_config(Arc::new(catalog()), config);
    let req = SuggestRequest {
        search: "de > mun".to_string(),
        ..SuggestRequest::default()
    };
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &req, analyst())
        .unwrap();

    assert_eq!(query.statement.sql.matches(" UNION ALL ").count(), 1);
    assert_eq!(query.statement.params[0], json!("de"));
    assert_eq!(query.statement.params[1], json!("%mun%"));
}

#[test]
fn case_sensitive_matching_keeps_the_token() {
    let mut config = EngineConfig::default();
    config.suggest.case_insensitive = false;
    let engine = SqlEngine::with_config(Arc::new(catalog()), config);
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &request("Ber"), analyst())
        .unwrap();

    assert!(!query.statement.sql.contains("LOWER("));
    assert_eq!(query.statement.params[0], json!("%Ber%"));
}

#[test]
fn like_wildcards_in_the_search_are_escaped() {
    let engine = engine();
    let query = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &request("50%_off"), analyst())
        .unwrap();
    assert_eq!(query.statement.params[0], json!(r"%50\%\_off%"));
}

#[test]
fn search_deeper_than_the_hierarchy_fails() {
    let engine = engine();
    let err = SuggestQueryBuilder::new(&engine)
        .build(&geo_hierarchy(), &request("a/b/c/d"), analyst())
        .unwrap_err();
    assert!(matches!(err, SqlBindError::Validation(_)));
}

#[test]
fn undefined_parent_level_is_rejected() {
    let hierarchy = SuggestHierarchy::from_yaml(
        r#"
binding_set: geo
levels:
  - id: country
  - id: city
    requires: region
"#,
    )
    .unwrap();
    let engine = engine();
    let err = SuggestQueryBuilder::new(&engine)
        .build(&hierarchy, &request(""), analyst())
        .unwrap_err();
    assert!(matches!(err, SqlBindError::HierarchyConfig(ref msg) if msg.contains("region")));
}

#[test]
fn requires_cycle_is_rejected() {
    let hierarchy = SuggestHierarchy::from_yaml(
        r#"
binding_set: geo
levels:
  - id: region
    requires: city
  - id: city
    requires: region
"#,
    )
    .unwrap();
    let engine = engine();
    let err = SuggestQueryBuilder::new(&engine)
        .build(&hierarchy, &request("x"), analyst())
        .unwrap_err();
    assert!(matches!(err, SqlBindError::HierarchyConfig(_)));
}

#[test]
fn binding_set_name_must_be_an_identifier() {
    let mut hierarchy = geo_hierarchy();
    hierarchy.binding_set = "geo data".to_string();
    let engine = engine();
    let err = SuggestQueryBuilder::new(&engine)
        .build(&hierarchy, &request(""), analyst())
        .unwrap_err();
    assert!(matches!(err, SqlBindError::HierarchyConfig(_)));
}

#[test]
fn suggest_over_a_group_resolves_one_member() {
    let hierarchy = SuggestHierarchy::from_yaml(
        r#"
binding_set: sales
levels:
  - id: country
  - id: city
    requires: country
"#,
    )
    .unwrap();
    let engine = engine();
    let query = SuggestQueryBuilder::new(&engine)
        .build(&hierarchy, &request("de"), analyst())
        .unwrap();

    let resolved: Vec<&str> = query.resolved.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(resolved, vec!["sales_city"]);
    assert_eq!(
        query.columns,
        vec![
            SuggestColumn {
                item: "country".to_string(),
                position: 1,
                caption_for: None,
            },
            SuggestColumn {
                item: "city".to_string(),
                position: 2,
                caption_for: None,
            },
        ]
    );
}
