pub mod ports;
pub mod size;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::inspector::{Access, InspectMode, Inspector, InvocationOutcome};

pub use ports::PortSet;
pub use size::{SizeRecord, SizeSource};

/// The `inspect --raw` document for one request, fetched on first use and
/// shared between the size and port resolvers.
pub struct RawManifest<'a> {
    inspector: &'a dyn Inspector,
    reference: &'a str,
    access: &'a Access,
    cell: OnceCell<Option<Value>>,
}

impl<'a> RawManifest<'a> {
    pub fn new(inspector: &'a dyn Inspector, reference: &'a str, access: &'a Access) -> Self {
        Self {
            inspector,
            reference,
            access,
            cell: OnceCell::new(),
        }
    }

    /// `None` when the raw invocation failed; the failure is logged once.
    pub async fn get(&self) -> Option<&Value> {
        self.cell
            .get_or_init(|| async {
                match self
                    .inspector
                    .inspect(self.reference, InspectMode::Raw, self.access)
                    .await
                {
                    InvocationOutcome::Success(doc) => Some(doc),
                    InvocationOutcome::AuthOrNotFound(msg)
                    | InvocationOutcome::OtherFailure(msg) => {
                        warn!(
                            image = self.reference,
                            error = %msg,
                            "raw manifest inspection failed"
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }
}

/// Size chain for a successful standard inspection, pulling the raw
/// manifest only when the standard document lacks per-layer sizes.
pub async fn size_record(doc: &Value, raw: &RawManifest<'_>) -> SizeRecord {
    let raw_doc = if size::needs_raw_manifest(doc) {
        raw.get().await
    } else {
        None
    };
    size::resolve(doc, raw_doc)
}
