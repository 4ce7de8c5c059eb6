use crate::command::IpaTool;
use crate::config::Config;
use crate::error::{ApiError, IpatoolWebError};
use crate::manifest;
use crate::parser::{self, ApplicationRecord};
use crate::store::{self, ArtifactStore, StagedArtifact};
use std::path::PathBuf;
use tracing::info;

const FALLBACK_HOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    TwoFactorRequired,
}

/// ipatool would read a leading `-` as one of its own flags.
fn looks_like_flag(value: &str) -> bool {
    value.starts_with('-')
}

fn mentions_two_factor(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("two-factor") || stderr.contains("2fa")
}

/// Runs each API operation against ipatool and the staging directories.
///
/// Holds no mutable state; every call is independent and may run alongside
/// any other.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Config,
    tool: IpaTool,
    store: ArtifactStore,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let tool = IpaTool::new(&config.tool_path, config.tool_timeout);
        let store = ArtifactStore::new(&config.staging_root);
        Self {
            config,
            tool,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Host to put in manifest URLs: the configured override, else what
    /// the client addressed us as.
    pub fn public_host(&self, request_host: Option<&str>) -> String {
        self.config
            .public_host
            .as_deref()
            .or(request_host)
            .filter(|h| !h.is_empty())
            .unwrap_or(FALLBACK_HOST)
            .to_string()
    }

    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        code: Option<&str>,
    ) -> Result<LoginOutcome, ApiError> {
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }

        let code = code.filter(|c| !c.is_empty());
        let mut args = vec![
            "auth",
            "login",
            "--email",
            email,
            "--password",
            password,
            "--keychain-passphrase",
            self.config.keychain_passphrase.as_str(),
        ];
        if let Some(code) = code {
            args.extend(["--code", code]);
        }

        match self.tool.invoke(&args).await {
            Ok(output) if mentions_two_factor(&output.stderr) => {
                info!("two-factor code required");
                Ok(LoginOutcome::TwoFactorRequired)
            }
            Ok(_) => {
                info!("authentication successful");
                Ok(LoginOutcome::Authenticated)
            }
            // A failure mentioning 2FA is a prompt, unless a code was already sent
            Err(e) if code.is_none() && e.tool_stderr().is_some_and(mentions_two_factor) => {
                info!("two-factor code required");
                Ok(LoginOutcome::TwoFactorRequired)
            }
            Err(e) => Err(ApiError::AuthenticationFailed(e)),
        }
    }

    /// Never fails: any problem running `auth info` means "not signed in".
    pub async fn auth_status(&self) -> bool {
        let args = [
            "auth",
            "info",
            "--keychain-passphrase",
            self.config.keychain_passphrase.as_str(),
        ];
        match self.tool.invoke(&args).await {
            Ok(_) => true,
            Err(e) => {
                info!(reason = %e, "not authenticated");
                false
            }
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<ApplicationRecord>, ApiError> {
        if query.is_empty() {
            return Err(ApiError::InvalidInput("Search query is required".to_string()));
        }
        if looks_like_flag(query) {
            return Err(ApiError::InvalidInput(
                "Search query must not start with '-'".to_string(),
            ));
        }

        let limit = self.config.search_limit.to_string();
        let args = [
            "search",
            query,
            "--keychain-passphrase",
            self.config.keychain_passphrase.as_str(),
            "--limit",
            limit.as_str(),
        ];
        let output = self
            .tool
            .invoke(&args)
            .await
            .map_err(ApiError::SearchFailed)?;

        let apps = parser::parse_search_output(&output.stdout);
        info!(count = apps.len(), "search finished");
        Ok(apps)
    }

    /// Downloads `bundle_id` into a fresh acquisition directory.
    pub async fn acquire(&self, bundle_id: &str) -> Result<StagedArtifact, ApiError> {
        if bundle_id.is_empty() {
            return Err(ApiError::InvalidInput("Bundle ID is required".to_string()));
        }
        if looks_like_flag(bundle_id) {
            return Err(ApiError::InvalidInput(
                "Bundle ID must not start with '-'".to_string(),
            ));
        }

        let destination = self
            .on_store(ArtifactStore::prepare_destination)
            .await
            .and_then(|prepared| prepared)
            .map_err(ApiError::DownloadFailed)?;
        let output_dir = destination.to_string_lossy().into_owned();
        let args = [
            "download",
            "--bundle-identifier",
            bundle_id,
            "--keychain-passphrase",
            self.config.keychain_passphrase.as_str(),
            "--output",
            output_dir.as_str(),
        ];
        self.tool
            .invoke(&args)
            .await
            .map_err(ApiError::DownloadFailed)?;

        let scanned = destination.clone();
        let artifact = self
            .on_store(move |_| store::first_package(&scanned))
            .await
            .map_err(ApiError::DownloadFailed)?
            .ok_or_else(|| {
                ApiError::DownloadFailed(IpatoolWebError::NoArtifactProduced(destination.clone()))
            })?;
        info!(file = %artifact.file_name, size = artifact.size, "package downloaded");
        Ok(artifact)
    }

    /// Runs filesystem work against the store off the async workers.
    async fn on_store<T, F>(&self, work: F) -> crate::error::Result<T>
    where
        F: FnOnce(&ArtifactStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || work(&store)).await?)
    }

    async fn resolve(&self, bundle_id: &str) -> Result<StagedArtifact, ApiError> {
        let bundle_id = bundle_id.to_string();
        self.on_store(move |store| store.resolve(&bundle_id))
            .await
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound("IPA file not found for this bundle ID"))
    }

    pub async fn manifest(&self, bundle_id: &str, public_host: &str) -> Result<String, ApiError> {
        let artifact = self.resolve(bundle_id).await?;
        info!(
            bundle_id,
            file = %artifact.file_name,
            url = %manifest::package_url(public_host, &artifact.file_name),
            "generating manifest"
        );
        manifest::build(bundle_id, &artifact, public_host).map_err(ApiError::Internal)
    }

    pub async fn manifest_debug(
        &self,
        bundle_id: &str,
        public_host: &str,
        detected_scheme: &str,
    ) -> Result<String, ApiError> {
        let artifact = self.resolve(bundle_id).await?;
        manifest::build_debug_view(bundle_id, &artifact, public_host, detected_scheme)
            .map_err(ApiError::Internal)
    }

    pub async fn locate_artifact(&self, file_name: &str) -> Result<PathBuf, ApiError> {
        let file_name = file_name.to_string();
        self.on_store(move |store| store.locate_by_name(&file_name))
            .await
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound("File not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn orchestrator(root: &Path) -> Orchestrator {
        Orchestrator::new(Config {
            tool_path: root.join("no-such-ipatool"),
            staging_root: root.to_path_buf(),
            ..Config::default()
        })
    }

    #[test]
    fn two_factor_detection_is_case_insensitive() {
        assert!(mentions_two_factor("Enter your Two-Factor code"));
        assert!(mentions_two_factor("2FA required"));
        assert!(!mentions_two_factor("invalid credentials"));
    }

    #[test]
    fn public_host_prefers_configured_override() {
        let temp = TempDir::new().unwrap();
        let mut app = orchestrator(temp.path());
        assert_eq!(app.public_host(Some("10.0.0.2:8443")), "10.0.0.2:8443");
        assert_eq!(app.public_host(None), "localhost");
        assert_eq!(app.public_host(Some("")), "localhost");

        app.config.public_host = Some("ipa.example.com".into());
        assert_eq!(app.public_host(Some("10.0.0.2:8443")), "ipa.example.com");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_running_the_tool() {
        let temp = TempDir::new().unwrap();
        let app = orchestrator(temp.path());

        let err = app.authenticate("me@example.com", "", None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(matches!(app.search("").await, Err(ApiError::InvalidInput(_))));
        assert!(matches!(app.acquire("").await, Err(ApiError::InvalidInput(_))));
        // No acquisition directory was created for the rejected download
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn tool_failures_map_per_operation() {
        let temp = TempDir::new().unwrap();
        let app = orchestrator(temp.path());

        assert!(matches!(
            app.authenticate("me@example.com", "pw", None).await,
            Err(ApiError::AuthenticationFailed(IpatoolWebError::ToolNotFound(_)))
        ));
        assert!(matches!(
            app.search("Instagram").await,
            Err(ApiError::SearchFailed(IpatoolWebError::ToolNotFound(_)))
        ));
        assert!(matches!(
            app.acquire("com.example.app").await,
            Err(ApiError::DownloadFailed(IpatoolWebError::ToolNotFound(_)))
        ));
        assert!(!app.auth_status().await);
    }

    #[tokio::test]
    async fn values_that_look_like_flags_are_rejected() {
        let temp = TempDir::new().unwrap();
        let app = orchestrator(temp.path());

        assert!(matches!(app.search("--help").await, Err(ApiError::InvalidInput(_))));
        match app.acquire("--help").await {
            Err(ApiError::InvalidInput(message)) => assert!(message.contains("'-'")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);

        // Dashes elsewhere are ordinary characters
        assert!(matches!(
            app.acquire("com.example.my-app").await,
            Err(ApiError::DownloadFailed(IpatoolWebError::ToolNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn manifest_and_artifact_lookups_report_not_found() {
        let temp = TempDir::new().unwrap();
        let app = orchestrator(temp.path());

        assert!(matches!(
            app.manifest("com.example.app", "localhost").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            app.manifest_debug("com.example.app", "localhost", "https").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            app.locate_artifact("com.example.app_1.2.ipa").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn manifest_uses_resolved_artifact() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("ipatool_5");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("com.example.app_1.2.ipa"), b"ipa").unwrap();

        let app = orchestrator(temp.path());
        let xml = app.manifest("com.example.app", "10.0.0.2").await.unwrap();
        assert!(xml.contains("https://10.0.0.2/api/download-file/com.example.app_1.2.ipa"));
        assert_eq!(
            app.locate_artifact("com.example.app_1.2.ipa").await.unwrap(),
            dir.join("com.example.app_1.2.ipa")
        );
    }
}
