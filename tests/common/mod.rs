#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pluto_channels_lib::server::gateway::Gateway;
use pluto_channels_lib::server::identity::{generate_devices, IdentityPool, DEVICE_POOL_SIZE};
use pluto_channels_lib::server::session::SessionCache;
use pluto_channels_lib::server::types::Credential;
use pluto_channels_lib::server::upstream::{Endpoints, UpstreamClient};

pub const STITCHER: &str = "https://stitcher.test";

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pluto_channels_lib=debug")
        .with_test_writer()
        .try_init();
}

pub fn endpoints(server: &MockServer) -> Endpoints {
    Endpoints {
        boot_url: server.uri(),
        channels_url: server.uri(),
        stitcher_url: STITCHER.to_string(),
    }
}

pub fn gateway_with(server: &MockServer, accounts: Vec<Credential>, devices: Vec<String>) -> Arc<Gateway> {
    let upstream = UpstreamClient::new(endpoints(server)).unwrap();
    Arc::new(Gateway::new(
        Arc::new(upstream),
        Arc::new(SessionCache::new()),
        Arc::new(IdentityPool::new(accounts, devices)),
    ))
}

pub fn gateway(server: &MockServer) -> Arc<Gateway> {
    gateway_with(server, Vec::new(), generate_devices(DEVICE_POOL_SIZE))
}

pub fn boot_body(token: &str) -> Value {
    json!({
        "sessionToken": token,
        "stitcherParams": "appName=web&deviceId=upstream-device&sid=upstream-sid&advertisingId=ad-1"
    })
}

pub async fn mount_boot(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/v4/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(boot_body(token)))
        .mount(server)
        .await;
}

pub fn channel(id: &str, number: u32) -> Value {
    json!({
        "id": id,
        "name": format!("Channel {id}"),
        "slug": format!("channel-{id}"),
        "number": number,
        "summary": format!("All about {id}"),
        "images": [{ "type": "colorLogoPNG", "url": format!("https://img.test/{id}.png") }]
    })
}

pub async fn mount_channels(server: &MockServer, channels: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/v2/guide/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": channels })))
        .mount(server)
        .await;
}

pub async fn mount_categories(server: &MockServer, categories: Value) {
    Mock::given(method("GET"))
        .and(path("/v2/guide/categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": categories })))
        .mount(server)
        .await;
}
