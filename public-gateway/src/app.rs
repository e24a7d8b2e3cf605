use std::{ops::Deref, sync::Arc, time::Duration};

pub struct AppInner {
    pub http: reqwest::Client,
    pub backend_url: String,
    pub backend_timeout: Duration,
}

#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl Deref for App {
    type Target = AppInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl App {
    pub fn new(backend_url: String, backend_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(backend_timeout)
            .build()?;
        Ok(Self {
            inner: Arc::new(AppInner {
                http,
                backend_url: backend_url.trim_end_matches('/').to_string(),
                backend_timeout,
            }),
        })
    }
}
