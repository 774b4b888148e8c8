use secrecy::SecretString;
use url::Url;

/// AWS credentials and region for the Bedrock backend
#[derive(Debug, Clone)]
pub struct AwsSecrets {
    /// Access key ID
    pub access_key_id: SecretString,
    /// Secret access key
    pub secret_access_key: SecretString,
    /// Default region
    pub region: String,
}

/// Google Cloud credentials for the Vertex backend
#[derive(Debug, Clone)]
pub struct VertexSecrets {
    /// GCP project ID
    pub project_id: String,
    /// GCP location (e.g. "us-central1")
    pub location: String,
    /// OAuth access token for the `aiplatform` API
    pub access_token: SecretString,
}

/// OpenAI API credentials
#[derive(Debug, Clone)]
pub struct OpenAiSecrets {
    /// API key
    pub api_key: SecretString,
    /// Base URL override for OpenAI-compatible endpoints
    pub base_url: Option<Url>,
}

/// Opaque credential bundle supplied once at process start
///
/// A backend whose slice is `None` had incomplete credentials in the
/// environment; it registers no factory and is simply unavailable.
#[derive(Debug, Clone, Default)]
pub struct ProviderSecrets {
    /// Bedrock credentials
    pub aws: Option<AwsSecrets>,
    /// Vertex credentials
    pub vertex: Option<VertexSecrets>,
    /// OpenAI credentials
    pub openai: Option<OpenAiSecrets>,
}

impl ProviderSecrets {
    /// Load the bundle from the environment
    ///
    /// Gateway-specific variables (`BEDROCK_*`, `VAI_*`) take precedence over
    /// the generic cloud SDK ones (`AWS_*`, `GCP_*`) so the gateway can use
    /// dedicated credentials in processes that also talk to other services.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            aws: load_aws(),
            vertex: load_vertex(),
            openai: load_openai(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_var_either(preferred: &str, fallback: &str) -> Option<String> {
    env_var(preferred).or_else(|| env_var(fallback))
}

fn load_aws() -> Option<AwsSecrets> {
    let access_key_id = env_var_either("BEDROCK_AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID")?;
    let secret_access_key = env_var_either("BEDROCK_AWS_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY")?;
    let region = env_var_either("BEDROCK_AWS_REGION", "AWS_REGION")?;

    Some(AwsSecrets {
        access_key_id: access_key_id.into(),
        secret_access_key: secret_access_key.into(),
        region,
    })
}

fn load_vertex() -> Option<VertexSecrets> {
    let project_id = env_var_either("VAI_PROJECT_ID", "GCP_PROJECT_ID")?;
    let location = env_var_either("VAI_LOCATION", "GCP_LOCATION")?;
    let access_token = env_var_either("VAI_ACCESS_TOKEN", "GCP_ACCESS_TOKEN")?;

    Some(VertexSecrets {
        project_id,
        location,
        access_token: access_token.into(),
    })
}

fn load_openai() -> Option<OpenAiSecrets> {
    let api_key = env_var("OPENAI_API_KEY")?;
    let base_url = env_var("OPENAI_BASE_URL").and_then(|v| Url::parse(&v).ok());

    Some(OpenAiSecrets {
        api_key: api_key.into(),
        base_url,
    })
}
