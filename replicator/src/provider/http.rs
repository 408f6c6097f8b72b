use replicator_core::{config::HttpProviderConfig, pool::WorkerPoolConfig, Direction};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};
use url::Url;

use super::ScalingProvider;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Request to scaling provider at {url} failed"))]
    SendRequest { source: reqwest::Error, url: Url },

    #[snafu(display("Scaling provider returned status {status} for {url}"))]
    UnexpectedStatus { status: StatusCode, url: Url },

    #[snafu(display("Failed to decode scaling provider response from {url}"))]
    DecodeResponse { source: reqwest::Error, url: Url },
}

pub struct HttpScalingProvider {
    client: Client,
    address: Url,
    token: Option<String>,
}

impl HttpScalingProvider {
    pub fn new(config: &HttpProviderConfig) -> Self {
        Self { client: Client::new(), address: config.address.clone(), token: config.token.clone() }
    }

    fn url(&self, path: &str) -> Url {
        self.address.join(path).expect("path is a valid relative URL")
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T, Error> {
        let url = self.url(path);
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context(SendRequestSnafu { url: url.clone() })?;
        ensure!(response.status().is_success(), UnexpectedStatusSnafu { status: response.status(), url: url.clone() });
        response.json().await.context(DecodeResponseSnafu { url })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path);
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context(SendRequestSnafu { url: url.clone() })?;
        ensure!(response.status().is_success(), UnexpectedStatusSnafu { status: response.status(), url: url.clone() });
        response.json().await.context(DecodeResponseSnafu { url })
    }
}

#[derive(Serialize)]
struct ScaleRequest<'a> {
    pool: &'a str,
    delta: i8,
}

#[derive(Deserialize)]
struct SafetyCheckResponse {
    ok: bool,
}

#[derive(Deserialize)]
struct RecentInstanceResponse {
    address: Option<String>,
}

#[derive(Serialize)]
struct InstanceActionRequest<'a> {
    pool: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    decrement_desired: Option<bool>,
}

#[derive(Deserialize)]
struct Ack {}

impl ScalingProvider for HttpScalingProvider {
    async fn scale(&self, pool: &WorkerPoolConfig, direction: Direction) -> Result<(), super::Error> {
        let delta = match direction {
            Direction::Out => 1,
            Direction::In => -1,
            Direction::None => 0,
        };
        let _: Ack = self.post("v1/scale", &ScaleRequest { pool: &pool.name, delta }).await?;
        Ok(())
    }

    async fn safety_check(&self, pool: &WorkerPoolConfig, current_members: u64) -> Result<bool, super::Error> {
        let response: SafetyCheckResponse = self
            .get(&format!("v1/pools/{}/safety-check?members={current_members}", pool.name))
            .await?;
        Ok(response.ok)
    }

    async fn most_recently_launched(&self, pool: &WorkerPoolConfig) -> Result<Option<String>, super::Error> {
        let response: RecentInstanceResponse = self.get(&format!("v1/pools/{}/recent-instance", pool.name)).await?;
        Ok(response.address)
    }

    async fn terminate(&self, pool: &WorkerPoolConfig, address: &str) -> Result<(), super::Error> {
        let _: Ack = self
            .post("v1/terminate", &InstanceActionRequest { pool: &pool.name, address, decrement_desired: None })
            .await?;
        Ok(())
    }

    async fn detach(&self, pool: &WorkerPoolConfig, address: &str, decrement_desired: bool) -> Result<(), super::Error> {
        let _: Ack = self
            .post(
                "v1/detach",
                &InstanceActionRequest { pool: &pool.name, address, decrement_desired: Some(decrement_desired) },
            )
            .await?;
        Ok(())
    }
}
