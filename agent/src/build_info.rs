use serde::Serialize;

/// Version metadata injected at compile time through the `AGENT_VERSION`, `AGENT_COMMIT`
/// and `AGENT_BUILD_TIME` environment variables. Built once in `main` and shared
/// read-only with every component that reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_time: String,
}

impl BuildInfo {
    pub fn new(
        version: impl Into<String>,
        commit: impl Into<String>,
        build_time: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            commit: commit.into(),
            build_time: build_time.into(),
        }
    }

    pub fn from_build_env() -> Self {
        Self::new(
            option_env!("AGENT_VERSION").unwrap_or("dev"),
            option_env!("AGENT_COMMIT").unwrap_or("unknown"),
            option_env!("AGENT_BUILD_TIME").unwrap_or("unknown"),
        )
    }

    /// Constant `agent_build_info` gauge, so dashboards can join on version and commit.
    pub fn record_metric(&self) {
        metrics::gauge!(
            "agent_build_info",
            "version" => self.version.clone(),
            "commit" => self.commit.clone()
        )
        .set(1.0);
    }
}
