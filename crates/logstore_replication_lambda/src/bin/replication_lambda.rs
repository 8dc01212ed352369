use aws_credential_types::provider::ProvideCredentials;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use logstore_replication_lambda::adapters::http_log_store::HttpLogStoreConnector;
use logstore_replication_lambda::handlers::replication::{prepare_replication, run_replication};
use logstore_replication_lambda::logging::init_tracing;
use logstore_replication_lambda::runtime::contract::{
    ExecutionCredentials, ReplicationEvent, TransferResult,
};
use logstore_replication_lambda::runtime::settings::ReplicationSettings;
use serde_json::Value;
use tracing::Instrument;

async fn load_execution_credentials() -> Result<ExecutionCredentials, Error> {
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let provider = aws_config
        .credentials_provider()
        .ok_or_else(|| Error::from("no execution credentials provider is configured"))?;
    let credentials = provider
        .provide_credentials()
        .await
        .map_err(|error| Error::from(format!("failed to resolve execution credentials: {error}")))?;

    Ok(ExecutionCredentials {
        access_key_id: credentials.access_key_id().to_string(),
        access_key_secret: credentials.secret_access_key().to_string(),
        security_token: credentials.session_token().map(str::to_string),
    })
}

async fn replicate(payload: Value) -> Result<TransferResult, Error> {
    // Everything that can be rejected without I/O is checked before credentials
    // are resolved or any client is built.
    let replication_event = ReplicationEvent::from_value(payload)?;
    let settings = ReplicationSettings::from_env()?;
    let plan = prepare_replication(replication_event, &settings)?;

    let credentials = load_execution_credentials().await?;
    let connector = HttpLogStoreConnector::new(credentials)
        .map_err(|error| Error::from(format!("failed to build log store client: {error}")))?;

    Ok(run_replication(&plan, &connector)?)
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<TransferResult, Error> {
    let (payload, context) = event.into_parts();
    let span = tracing::info_span!("invocation", aws_request_id = %context.request_id);
    replicate(payload).instrument(span).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    lambda_runtime::run(service_fn(handle_request)).await
}
