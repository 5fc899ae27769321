//! Reactive property system.
//!
//! Properties hold a current value and can be watched for changes. Watchers
//! receive the current value immediately and every subsequent change.

use std::fmt::Debug;

use futures::stream::Stream;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Stream of property value changes.
pub type PropertyStream<T> = Box<dyn Stream<Item = T> + Send + Unpin>;

/// Reactive property exposing service state.
///
/// # Reading State
///
/// - `.get()` - Returns the current value (snapshot)
/// - `.watch()` - Returns a stream that yields on every change
///
/// ```ignore
/// // Snapshot
/// let strength = device.strength.get();
///
/// // React to changes
/// let mut stream = device.strength.watch();
/// while let Some(percent) = stream.next().await {
///     println!("Strength: {percent}");
/// }
/// ```
#[derive(Clone)]
pub struct Property<T: Clone + Send + Sync + 'static> {
    tx: watch::Sender<T>,
    rx: watch::Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> Property<T> {
    /// Creates a property with an initial value.
    pub fn new(initial: T) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self { tx, rx }
    }

    /// Sets the property value, notifying watchers if changed.
    pub fn set(&self, new_value: T)
    where
        T: PartialEq,
    {
        self.tx.send_if_modified(|current| {
            if *current != new_value {
                *current = new_value;
                return true;
            }

            false
        });
    }

    /// Returns the current value.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Watches for value changes.
    ///
    /// Yields the current value immediately, then on every change.
    pub fn watch(&self) -> impl Stream<Item = T> + Send + 'static {
        WatchStream::new(self.rx.clone())
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.get())
            .finish()
    }
}

impl<T: Clone + Send + Sync + Serialize + 'static> Serialize for Property<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.get().serialize(serializer)
    }
}

impl<'de, T: Clone + Send + Sync + Deserialize<'de> + 'static> Deserialize<'de> for Property<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = T::deserialize(deserializer)?;
        Ok(Property::new(value))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn set_updates_value_when_different() {
        let property = Property::new(42);

        property.set(100);

        assert_eq!(property.get(), 100);
    }

    #[test]
    fn set_does_not_notify_when_value_unchanged() {
        let property = Property::new(42);
        let mut watch_stream = property.watch();

        property.set(42);

        let current_value = tokio::runtime::Runtime::new().unwrap().block_on(async {
            tokio::time::timeout(tokio::time::Duration::from_millis(10), watch_stream.next()).await
        });

        assert!(current_value.is_ok());
        assert_eq!(current_value.unwrap().unwrap(), 42);

        property.set(42);

        let next_value = tokio::runtime::Runtime::new().unwrap().block_on(async {
            tokio::time::timeout(tokio::time::Duration::from_millis(10), watch_stream.next()).await
        });

        assert!(next_value.is_err());
    }

    #[tokio::test]
    async fn set_notifies_watchers_when_value_changes() {
        let property = Property::new(1);
        let mut watch_stream = property.watch();

        let initial = watch_stream.next().await;
        assert_eq!(initial, Some(1));

        property.set(2);

        let updated = watch_stream.next().await;
        assert_eq!(updated, Some(2));
    }

    #[test]
    fn serializes_to_inner_value() {
        let property = Property::new(42);

        let json = serde_json::to_string(&property).unwrap();

        assert_eq!(json, "42");
    }

    #[test]
    fn deserializes_from_inner_value() {
        let json = "\"hello\"";

        let property: Property<String> = serde_json::from_str(json).unwrap();

        assert_eq!(property.get(), "hello");
    }
}
