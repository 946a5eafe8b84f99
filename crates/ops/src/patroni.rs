//! Patroni REST API: the only way to change parameters Postgres reads at bootstrap.

use std::collections::BTreeMap;
use std::time::Duration;

use keel_core::{Error, Result};
use tracing::debug;

use crate::PodInfo;

#[async_trait::async_trait]
pub trait RuntimeChannel: Send + Sync {
    async fn set_postgres_parameters(&self, pod: &PodInfo, params: &BTreeMap<String, String>) -> Result<()>;
}

pub struct PatroniClient {
    http: reqwest::Client,
    port: u16,
}

impl PatroniClient {
    pub fn new(port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Transport(format!("building patroni http client: {}", e)))?;
        Ok(Self { http, port })
    }

    fn config_url(&self, pod: &PodInfo) -> Result<String> {
        let ip = pod.ip.as_deref().ok_or_else(|| Error::Transport(format!("pod {} has no IP address", pod.name)))?;
        Ok(format!("http://{}:{}/config", ip, self.port))
    }
}

pub fn parameters_body(params: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::json!({ "postgresql": { "parameters": params } })
}

#[async_trait::async_trait]
impl RuntimeChannel for PatroniClient {
    async fn set_postgres_parameters(&self, pod: &PodInfo, params: &BTreeMap<String, String>) -> Result<()> {
        let url = self.config_url(pod)?;
        debug!(pod = %pod.name, url = %url, "patroni: PATCH config");
        let resp = self
            .http
            .patch(&url)
            .json(&parameters_body(params))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("patroni request to {}: {}", pod.name, e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("patroni on {} returned {}: {}", pod.name, status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_nests_parameters_under_postgresql() {
        let params: BTreeMap<String, String> = [("max_connections".to_string(), "200".to_string())].into_iter().collect();
        assert_eq!(parameters_body(&params), serde_json::json!({"postgresql": {"parameters": {"max_connections": "200"}}}));
    }

    #[test]
    fn pod_without_ip_is_a_transport_error() {
        let c = PatroniClient::new(8008).unwrap();
        let pod = PodInfo { name: "acid-0".into(), ..Default::default() };
        assert!(matches!(c.config_url(&pod), Err(Error::Transport(_))));
        let pod = PodInfo { name: "acid-0".into(), ip: Some("10.0.0.7".into()), ..Default::default() };
        assert_eq!(c.config_url(&pod).unwrap(), "http://10.0.0.7:8008/config");
    }
}
