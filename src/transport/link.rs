//! The bound connection handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::{CharacteristicRole, DeviceId, Radio, WriteKind};
use crate::error::{LinkError, Result};

/// Latest published link; `None` while disconnected.
///
/// Only the connection manager holds the sending half.
pub type LinkSlot = watch::Receiver<Option<Link>>;

/// Snapshot the link currently published in `slot`.
#[inline]
pub fn current_link(slot: &LinkSlot) -> Option<Link> {
    slot.borrow().clone()
}

/// An established connection with its characteristics bound by role.
///
/// Cheap to clone. A `Link` is never mutated after publication; a reconnect
/// publishes a new one.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    device: DeviceId,
    radio: Arc<dyn Radio>,
    bindings: HashMap<CharacteristicRole, Uuid>,
}

impl Link {
    pub fn new(
        device: DeviceId,
        radio: Arc<dyn Radio>,
        bindings: HashMap<CharacteristicRole, Uuid>,
    ) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                device,
                radio,
                bindings,
            }),
        }
    }

    #[inline]
    pub fn device(&self) -> &DeviceId {
        &self.inner.device
    }

    /// Whether the device exposed the characteristic for `role`.
    #[inline]
    pub fn has(&self, role: CharacteristicRole) -> bool {
        self.inner.bindings.contains_key(&role)
    }

    /// UUID bound to `role`.
    pub fn uuid(&self, role: CharacteristicRole) -> Result<Uuid> {
        self.inner
            .bindings
            .get(&role)
            .copied()
            .ok_or(LinkError::MissingCharacteristic(role))
    }

    pub async fn read(&self, role: CharacteristicRole) -> Result<Bytes> {
        let uuid = self.uuid(role)?;
        self.inner.radio.read(&self.inner.device, uuid).await
    }

    /// Acknowledged write.
    pub async fn write(&self, role: CharacteristicRole, data: impl Into<Bytes>) -> Result<()> {
        let uuid = self.uuid(role)?;
        self.inner
            .radio
            .write(&self.inner.device, uuid, data.into(), WriteKind::WithResponse)
            .await
    }

    /// Fire-and-forget write.
    pub async fn write_without_response(
        &self,
        role: CharacteristicRole,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let uuid = self.uuid(role)?;
        self.inner
            .radio
            .write(&self.inner.device, uuid, data.into(), WriteKind::WithoutResponse)
            .await
    }

    pub async fn subscribe(&self, role: CharacteristicRole) -> Result<mpsc::Receiver<Bytes>> {
        let uuid = self.uuid(role)?;
        self.inner.radio.subscribe(&self.inner.device, uuid).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.inner.radio.disconnect(&self.inner.device).await
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut roles: Vec<_> = self.inner.bindings.keys().collect();
        roles.sort();
        f.debug_struct("Link")
            .field("device", &self.inner.device)
            .field("roles", &roles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceLayout;
    use crate::transport::memory::MemoryRadio;

    fn link_with(roles: &[CharacteristicRole]) -> (Arc<MemoryRadio>, Link) {
        let layout = ServiceLayout::default();
        let radio = Arc::new(MemoryRadio::new(&layout));
        let bindings = roles.iter().map(|r| (*r, layout.uuid_for(*r))).collect();
        let link = Link::new(DeviceId::new("dev"), radio.clone(), bindings);
        (radio, link)
    }

    #[tokio::test]
    async fn test_unbound_role_is_reported() {
        let (_radio, link) = link_with(&[CharacteristicRole::AudioIn]);
        assert!(link.has(CharacteristicRole::AudioIn));
        assert!(!link.has(CharacteristicRole::Battery));
        let err = link.read(CharacteristicRole::Battery).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::MissingCharacteristic(CharacteristicRole::Battery)
        ));
    }

    #[tokio::test]
    async fn test_write_kinds() {
        let (radio, link) = link_with(&[CharacteristicRole::AudioIn, CharacteristicRole::Haptic]);
        radio.connect(link.device()).await.unwrap();
        link.write_without_response(CharacteristicRole::AudioIn, vec![1u8])
            .await
            .unwrap();
        link.write(CharacteristicRole::Haptic, vec![2u8]).await.unwrap();

        let writes = radio.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].kind, WriteKind::WithoutResponse);
        assert_eq!(writes[1].kind, WriteKind::WithResponse);
        assert_eq!(&writes[1].data[..], &[2]);
    }
}
