use crate::runtime::contract::{BatchGetLogRequest, BatchPage, PutLogsRequest};
use crate::runtime::error::StoreError;

pub trait SourceLogStore {
    fn batch_get_log(&self, request: &BatchGetLogRequest<'_>) -> Result<BatchPage, StoreError>;
}

pub trait TargetLogStore {
    fn put_logs(&self, request: &PutLogsRequest<'_>) -> Result<(), StoreError>;
}

/// Builds invocation-scoped clients bound to the execution credentials.
pub trait LogStoreConnector {
    fn connect_source(&self, endpoint: &str) -> Result<Box<dyn SourceLogStore + '_>, StoreError>;

    fn connect_target(&self, endpoint: &str) -> Result<Box<dyn TargetLogStore + '_>, StoreError>;
}

impl<T: SourceLogStore + ?Sized> SourceLogStore for &T {
    fn batch_get_log(&self, request: &BatchGetLogRequest<'_>) -> Result<BatchPage, StoreError> {
        (**self).batch_get_log(request)
    }
}

impl<T: TargetLogStore + ?Sized> TargetLogStore for &T {
    fn put_logs(&self, request: &PutLogsRequest<'_>) -> Result<(), StoreError> {
        (**self).put_logs(request)
    }
}
