//! Object URL capability: the shell owns `URL.createObjectURL` /
//! `URL.revokeObjectURL`; the core owns the handle lifecycle so every
//! created URL is eventually revoked.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectUrlOperation {
    Create {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        mime_type: String,
    },
    Revoke {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectUrlOutput {
    Created { url: String },
    Revoked,
}

impl Operation for ObjectUrlOperation {
    type Output = ObjectUrlOutput;
}

pub struct ObjectUrl<Ev> {
    context: CapabilityContext<ObjectUrlOperation, Ev>,
}

impl<Ev> Capability<Ev> for ObjectUrl<Ev> {
    type Operation = ObjectUrlOperation;
    type MappedSelf<MappedEv> = ObjectUrl<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        ObjectUrl::new(self.context.map_event(f))
    }
}

impl<Ev> ObjectUrl<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<ObjectUrlOperation, Ev>) -> Self {
        Self { context }
    }

    /// Asks the shell for a display URL backed by `data`. The URL comes
    /// back as an event so the core can attach it to the held image.
    pub fn create<F>(&self, data: Vec<u8>, mime_type: String, make_event: F)
    where
        F: FnOnce(String) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let output = context
                .request_from_shell(ObjectUrlOperation::Create { data, mime_type })
                .await;
            if let ObjectUrlOutput::Created { url } = output {
                context.update_app(make_event(url));
            }
        });
    }

    /// Releases a previously created URL. Fire and forget: there is
    /// nothing for the core to do once the shell confirms.
    pub fn revoke(&self, url: String) {
        let context = self.context.clone();
        self.context.spawn(async move {
            let _ = context
                .request_from_shell(ObjectUrlOperation::Revoke { url })
                .await;
        });
    }
}

#[cfg(test)]
impl<Ev> Default for ObjectUrl<Ev>
where
    Ev: 'static,
{
    fn default() -> Self {
        panic!("ObjectUrl::default() should only be used in test context with mocking")
    }
}
