use tracing::info;

use crate::Result;
use crate::kvstore::Connector;
use crate::message::Record;
use crate::sinker::manager::SinkResourceManager;

/// Per-element lifecycle the runner drives on every worker: `setup` once per bundle, `process`
/// for each element in delivery order, `teardown` on every exit path of the bundle.
#[trait_variant::make(Stage: Send)]
#[allow(dead_code)]
pub trait LocalStage {
    async fn setup(&mut self) -> Result<()>;

    /// Consumes one record. Terminal stages emit nothing downstream.
    async fn process(&mut self, record: &Record) -> Result<()>;

    async fn teardown(&mut self) -> Result<()>;
}

/// WriteStage is the terminal stage that writes every record into the key-value store.
pub struct WriteStage<C: Connector> {
    manager: SinkResourceManager<C>,
}

impl<C: Connector> WriteStage<C> {
    pub fn new(manager: SinkResourceManager<C>) -> Self {
        Self { manager }
    }
}

impl<C> Stage for WriteStage<C>
where
    C: Connector + Sync,
{
    async fn setup(&mut self) -> Result<()> {
        self.manager.setup().await
    }

    async fn process(&mut self, record: &Record) -> Result<()> {
        let outcome = self.manager.process(record).await?;
        info!(
            worker = self.manager.worker(),
            key = %outcome.key,
            bytes = outcome.bytes,
            "Wrote record"
        );
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.manager.teardown().await
    }
}
