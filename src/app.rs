//! App configuration
//!
//! [`App`] holds the project configuration both REST backends need and wires
//! them into gateways. Nothing is registered globally: every gateway built
//! from an app receives its backend handle explicitly.

use crate::auth::{IdentityBackend, IdentityGateway, ProviderFlow, RestIdentity};
use crate::database::{RecordStore, RestDatabase};
use crate::error::SyncError;
use std::sync::Arc;

/// Environment variable holding the API key
pub const ENV_API_KEY: &str = "FIREBASE_API_KEY";
/// Environment variable holding the project id
pub const ENV_PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
/// Environment variable holding the database URL (optional)
pub const ENV_DATABASE_URL: &str = "FIREBASE_DATABASE_URL";

const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// App configuration options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppOptions {
    /// Web API key
    pub api_key: String,
    /// Project id
    pub project_id: String,
    /// Realtime database URL; defaults to `https://{project_id}-default-rtdb.firebaseio.com`
    pub database_url: Option<String>,
    /// App name (optional, defaults to "[DEFAULT]")
    pub app_name: Option<String>,
}

/// Validated app configuration
///
/// Cheap to clone.
#[derive(Clone, Debug)]
pub struct App {
    inner: Arc<AppInner>,
}

#[derive(Debug)]
struct AppInner {
    name: String,
    options: AppOptions,
}

impl App {
    /// Create an app from explicit options
    ///
    /// # Example
    /// ```
    /// use record_sync::{App, AppOptions};
    ///
    /// let app = App::create(AppOptions {
    ///     api_key: "YOUR_API_KEY".to_string(),
    ///     project_id: "your-project-id".to_string(),
    ///     ..Default::default()
    /// })?;
    /// assert_eq!(app.database_url(), "https://your-project-id-default-rtdb.firebaseio.com");
    /// # Ok::<(), record_sync::SyncError>(())
    /// ```
    pub fn create(options: AppOptions) -> Result<Self, SyncError> {
        // Validate options (error case first)
        if options.api_key.trim().is_empty() {
            return Err(SyncError::config("API key not configured"));
        }
        if options.project_id.trim().is_empty() {
            return Err(SyncError::config("Project ID cannot be empty"));
        }

        let name = options
            .app_name
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        Ok(Self {
            inner: Arc::new(AppInner { name, options }),
        })
    }

    /// Create an app from `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID` and the
    /// optional `FIREBASE_DATABASE_URL`
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create an app from variables supplied by `lookup`
    pub fn from_vars<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY).ok_or_else(|| SyncError::config(format!("{} not set", ENV_API_KEY)))?;
        let project_id =
            lookup(ENV_PROJECT_ID).ok_or_else(|| SyncError::config(format!("{} not set", ENV_PROJECT_ID)))?;
        let database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty());

        Self::create(AppOptions {
            api_key,
            project_id,
            database_url,
            app_name: None,
        })
    }

    /// Get the app name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the app options
    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    /// Realtime database URL, explicit or derived from the project id
    pub fn database_url(&self) -> String {
        match &self.inner.options.database_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-default-rtdb.firebaseio.com", self.inner.options.project_id),
        }
    }

    /// Identity backend for this project
    pub fn rest_identity(&self, flow: Arc<dyn ProviderFlow>) -> Result<RestIdentity, SyncError> {
        RestIdentity::new(self.inner.options.api_key.clone(), flow)
    }

    /// Database backend for this project, authenticated by `identity` if given
    pub fn rest_database(&self, identity: Option<Arc<dyn IdentityBackend>>) -> Result<RestDatabase, SyncError> {
        let database = RestDatabase::new(&self.database_url())?;
        Ok(match identity {
            Some(identity) => database.with_auth(identity),
            None => database,
        })
    }

    /// Build both gateways over the REST backends
    ///
    /// The record store authenticates with the identity gateway's session.
    ///
    /// # Example
    /// ```no_run
    /// # use record_sync::auth::ProviderFlow;
    /// # async fn example(flow: std::sync::Arc<dyn ProviderFlow>) -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::auth::SignInMethod;
    /// use record_sync::App;
    /// use serde_json::json;
    ///
    /// let app = App::from_env()?;
    /// let (identity, store) = app.connect(flow)?;
    ///
    /// let outcome = identity.sign_in(SignInMethod::Anonymous).await?;
    /// if let Some(session) = outcome.session() {
    ///     store.create(session.owner_id(), &json!({"score": 10})).await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(&self, flow: Arc<dyn ProviderFlow>) -> Result<(IdentityGateway, RecordStore), SyncError> {
        let identity: Arc<dyn IdentityBackend> = Arc::new(self.rest_identity(flow)?);
        let database = self.rest_database(Some(Arc::clone(&identity)))?;

        let gateway = IdentityGateway::new(identity);
        let store = RecordStore::new(Arc::new(database));
        Ok((gateway, store))
    }
}
