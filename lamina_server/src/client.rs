// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client sessions.

use std::fmt;
use std::sync::Arc;

use lamina_core::layer::{ClientId, LayerFlags, LayerId, LayerKind};
use lamina_core::transaction::Transaction;

use crate::buffer_queue::BufferProducer;
use crate::error::Result;
use crate::state::StateShared;

/// A layer just created by a [`Client`].
#[derive(Debug)]
pub struct LayerHandle {
    /// Handle used in transactions.
    pub id: LayerId,
    /// Producer end of the layer's buffer queue; `None` for solid color
    /// layers.
    pub producer: Option<BufferProducer>,
}

/// One client's connection to the compositor.
///
/// Layers belong to the client that created them. Dropping the client
/// destroys every layer it still owns.
pub struct Client {
    id: ClientId,
    shared: Arc<StateShared>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(shared: Arc<StateShared>) -> Self {
        let id = shared.new_client();
        Self { id, shared }
    }

    /// This client's id, as recorded in layer ownership.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Creates a layer. It becomes visible to composition at the next
    /// commit.
    ///
    /// Sizes are validated against the configured maximum surface
    /// dimension; negative sizes are rejected.
    pub fn create_layer(
        &self,
        name: &str,
        width: i32,
        height: i32,
        kind: LayerKind,
        flags: LayerFlags,
    ) -> Result<LayerHandle> {
        let (id, producer) = self
            .shared
            .create_layer(self.id, name, width, height, kind, flags)?;
        tracing::debug!(client = ?self.id, layer = ?id, name, "layer created");
        Ok(LayerHandle { id, producer })
    }

    /// Removes one of this client's layers at the next commit.
    pub fn destroy_layer(&self, id: LayerId) -> Result<()> {
        self.shared.destroy_layer(self.id, id)
    }

    /// Applies `txn` atomically.
    ///
    /// Either every change lands or none does. A synchronous transaction
    /// returns once the compositor has committed it, or after the
    /// configured timeout.
    pub fn apply(&self, txn: &Transaction) -> Result<()> {
        self.shared.apply_transaction(self.id, txn)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.destroy_client_layers(self.id);
    }
}
