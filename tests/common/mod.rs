//! Common test utilities for objectloader integration tests

use objectloader::LoaderConfig;
use wiremock::MockServer;

pub const PROJECT: &str = "proj";
pub const ROOT: &str = "root";

/// Config pointed at `server`
pub fn config_for(server: &MockServer) -> LoaderConfig {
    LoaderConfig::new(server.uri(), PROJECT, ROOT).with_token("test-token")
}

/// One `<id>\t<json>` line
pub fn line(id: &str, speckle_type: &str) -> String {
    format!(
        "{id}\t{}\n",
        serde_json::json!({ "id": id, "speckle_type": speckle_type })
    )
}

#[allow(dead_code)]
pub fn batch_path() -> String {
    format!("/api/getobjects/{PROJECT}")
}

#[allow(dead_code)]
pub fn single_path(id: &str) -> String {
    format!("/objects/{PROJECT}/{id}/single")
}
