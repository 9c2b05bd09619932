use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{worker::JobContext, DispatchResult, WorkError, WorkHandler};

/// Serialize a payload to JSON bytes
pub fn encode<T: Serialize + ?Sized>(value: &T) -> DispatchResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a JSON payload
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DispatchResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// [`WorkHandler`] that decodes its input from JSON and encodes its output back.
///
/// Malformed input fails the job with status `error` instead of reaching the
/// callback.
pub struct JsonHandler<F, I, O> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

/// Wrap a typed async closure as a JSON [`WorkHandler`]
pub fn json_handler<F, Fut, I, O>(f: F) -> JsonHandler<F, I, O>
where
    F: Fn(JobContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, WorkError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    JsonHandler {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> WorkHandler for JsonHandler<F, I, O>
where
    F: Fn(JobContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, WorkError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    async fn work(&self, job: JobContext, input: Vec<u8>) -> Result<Vec<u8>, WorkError> {
        let input: I = serde_json::from_slice(&input)
            .map_err(|e| WorkError::new(format!("invalid JSON input: {}", e)))?;
        let output = (self.f)(job, input).await?;
        serde_json::to_vec(&output).map_err(|e| WorkError::new(format!("failed to encode output: {}", e)))
    }
}
