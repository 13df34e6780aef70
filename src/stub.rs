use crate::client::AggregateClient;
use crate::codec::Codec;
use crate::core::{OperationId, PrimitiveOperation, ProxyError, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;

/// Compile-time operation table of one primitive type.
///
/// Usually derived with `#[derive(Operations)]` on a fieldless enum.
pub trait PrimitiveOperations: Sized + Send + Sync + 'static {
    const OPERATIONS: &'static [OperationId];

    fn operation_id(&self) -> &'static OperationId;

    fn from_operation_id(id: &OperationId) -> Option<Self>;

    fn lookup(name: &str) -> Option<&'static OperationId> {
        Self::OPERATIONS.iter().find(|operation| operation.name() == name)
    }
}

/// Turns capability calls into encoded operations and hands them to the
/// partition that owns the routing key.
///
/// Whether that partition runs in direct or log-replicated mode is decided
/// by the client's configuration; the dispatcher does not care.
pub struct StubDispatcher<O> {
    client: Arc<AggregateClient>,
    codec: Codec,
    _operations: PhantomData<fn() -> O>,
}

impl<O> Clone for StubDispatcher<O> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            codec: self.codec,
            _operations: PhantomData,
        }
    }
}

impl<O: PrimitiveOperations> StubDispatcher<O> {
    pub fn new(client: Arc<AggregateClient>) -> Self {
        let codec = client.config().codec;
        Self {
            client,
            codec,
            _operations: PhantomData,
        }
    }

    pub fn client(&self) -> &Arc<AggregateClient> {
        &self.client
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Resolves an operation by name without contacting any session.
    pub fn resolve(&self, name: &str) -> Result<&'static OperationId> {
        O::lookup(name).ok_or_else(|| ProxyError::UnknownOperation(name.to_string()))
    }

    pub fn prepare<A: Serialize + ?Sized>(
        &self,
        operation: &OperationId,
        args: &A,
    ) -> Result<PrimitiveOperation> {
        Ok(PrimitiveOperation::new(
            operation.clone(),
            self.codec.encode(args)?,
        ))
    }

    pub async fn invoke<A, R>(&self, operation: O, key: Option<&[u8]>, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.dispatch(operation.operation_id(), key, args).await
    }

    /// Invokes an operation by name; unknown names fail with `UnknownOperation`.
    pub async fn invoke_named<A, R>(&self, name: &str, key: Option<&[u8]>, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let operation = self.resolve(name)?;
        self.dispatch(operation, key, args).await
    }

    /// Invokes an operation on every partition; results are in partition order.
    pub async fn invoke_all<A, R>(&self, operation: O, args: &A) -> Result<Vec<R>>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let prepared = self.prepare(operation.operation_id(), args)?;
        self.client
            .broadcast(prepared)
            .await?
            .into_iter()
            .map(|(_, bytes)| self.codec.decode(&bytes))
            .collect()
    }

    async fn dispatch<A, R>(
        &self,
        operation: &OperationId,
        key: Option<&[u8]>,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let prepared = self.prepare(operation, args)?;
        let bytes = self.client.submit(key, prepared).await?;
        self.codec.decode(&bytes)
    }
}
