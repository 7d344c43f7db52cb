mod common;

use std::collections::HashSet;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pluto_channels_lib::server::catalog::{CatalogBuilder, DEFAULT_GROUP};
use pluto_channels_lib::server::types::Region;

use common::{channel, gateway, mount_categories, mount_channels};

#[tokio::test]
async fn region_catalog_resolves_collisions_and_groups() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v4/start"))
        .and(header("X-Forwarded-For", "192.206.151.131"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::boot_body("tok-ca")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .and(header("authorization", "Bearer tok-ca"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [channel("a", 1), channel("b", 1), channel("c", 2)]
        })))
        .mount(&server)
        .await;
    mount_categories(&server, json!([{ "name": "News", "channelIDs": ["b"] }])).await;

    let catalog = CatalogBuilder::new(gateway(&server))
        .build_for(Region::Ca)
        .await
        .unwrap();

    let numbers: Vec<u32> = catalog.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(catalog[1].id, "b");
    assert_eq!(catalog[1].group, "News");
    assert_eq!(catalog[0].group, DEFAULT_GROUP);
    assert_eq!(catalog[2].group, DEFAULT_GROUP);
    assert!(catalog.iter().all(|c| c.country_code == "ca"));
    assert_eq!(catalog[0].logo.as_deref(), Some("https://img.test/a.png"));
}

#[tokio::test]
async fn failed_category_listing_degrades_to_default_group() {
    let server = MockServer::start().await;
    common::mount_boot(&server, "tok").await;
    mount_channels(&server, vec![channel("a", 4)]).await;
    Mock::given(method("GET"))
        .and(path("/v2/guide/categories"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let catalog = CatalogBuilder::new(gateway(&server))
        .build_for(Region::Uk)
        .await
        .unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].group, DEFAULT_GROUP);
}

#[tokio::test]
async fn failed_channel_listing_is_an_error() {
    let server = MockServer::start().await;
    common::mount_boot(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_categories(&server, json!([])).await;

    let result = CatalogBuilder::new(gateway(&server)).build_for(Region::Fr).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn aggregate_dedups_and_offsets_by_region() {
    let server = MockServer::start().await;
    common::mount_boot(&server, "tok").await;
    mount_categories(&server, json!([])).await;

    // UK gets its own listing; every other region sees the local one.
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .and(header("X-Forwarded-For", "178.238.11.6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [channel("shared", 10), channel("uk50", 50)]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [channel("shared", 50), channel("us", 7050)]
        })))
        .with_priority(10)
        .mount(&server)
        .await;

    let merged = CatalogBuilder::new(gateway(&server))
        .build_for(Region::All)
        .await
        .unwrap();

    let ids: Vec<&str> = merged.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["shared", "us", "uk50"]);

    let numbers: Vec<u32> = merged.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![50, 7050, 7051]);
    assert_eq!(merged[0].country_code, "local");
    assert_eq!(merged[2].country_code, "uk");

    let unique: HashSet<u32> = numbers.iter().copied().collect();
    assert_eq!(unique.len(), numbers.len());
}

#[tokio::test]
async fn aggregate_skips_failing_regions() {
    let server = MockServer::start().await;
    common::mount_boot(&server, "tok").await;
    mount_categories(&server, json!([])).await;
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .and(header("X-Forwarded-For", "81.173.176.155"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [channel("de1", 5)] })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .respond_with(ResponseTemplate::new(502))
        .with_priority(10)
        .mount(&server)
        .await;

    let merged = CatalogBuilder::new(gateway(&server))
        .build_for(Region::All)
        .await
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].number, 9005);
}
