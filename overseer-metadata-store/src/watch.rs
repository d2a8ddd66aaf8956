use etcd_client::{EventType, WatchStream as EtcdWatchStream, Watcher};
use futures::stream::Stream;
use futures::StreamExt;
use std::task::{Context, Poll};
use std::{fmt, pin::Pin};

use crate::errors::{MetadataError, Result};

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        mod_revision: Option<i64>,
        version: Option<i64>,
    },
    Delete {
        key: Vec<u8>,
        mod_revision: Option<i64>,
        version: Option<i64>,
    },
}

impl WatchEvent {
    pub fn key(&self) -> &[u8] {
        match self {
            WatchEvent::Put { key, .. } => key,
            WatchEvent::Delete { key, .. } => key,
        }
    }
}

pub struct WatchStream {
    inner: Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>,
    // Cancels the etcd watch when the stream is dropped.
    _etcd_watcher: Option<Watcher>,
}

impl Stream for WatchStream {
    type Item = Result<WatchEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl WatchStream {
    pub fn new(stream: impl Stream<Item = Result<WatchEvent>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
            _etcd_watcher: None,
        }
    }

    pub(crate) fn from_etcd(watcher: Watcher, stream: EtcdWatchStream) -> Self {
        let stream = stream.flat_map(|result| {
            let items: Vec<Result<WatchEvent>> = match result {
                Ok(watch_response) => watch_response
                    .events()
                    .iter()
                    .filter_map(|event| {
                        let key_value = event.kv()?;
                        Some(Ok(match event.event_type() {
                            EventType::Put => WatchEvent::Put {
                                key: key_value.key().to_vec(),
                                value: key_value.value().to_vec(),
                                mod_revision: Some(key_value.mod_revision()),
                                version: Some(key_value.version()),
                            },
                            EventType::Delete => WatchEvent::Delete {
                                key: key_value.key().to_vec(),
                                mod_revision: Some(key_value.mod_revision()),
                                version: Some(key_value.version()),
                            },
                        }))
                    })
                    .collect(),
                Err(e) => vec![Err(MetadataError::from(e))],
            };
            futures::stream::iter(items)
        });

        Self {
            inner: Box::pin(stream),
            _etcd_watcher: Some(watcher),
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::Put {
                key,
                value: _,
                mod_revision,
                version,
            } => {
                let key_str = String::from_utf8_lossy(key);
                write!(f, "Put(key: {}", key_str)?;
                if let Some(rev) = mod_revision {
                    write!(f, ", mod_revision: {}", rev)?;
                }
                if let Some(ver) = version {
                    write!(f, ", version: {}", ver)?;
                }
                write!(f, ")")
            }
            WatchEvent::Delete {
                key,
                mod_revision,
                version,
            } => {
                let key_str = String::from_utf8_lossy(key);
                write!(f, "Delete(key: {}", key_str)?;
                if let Some(rev) = mod_revision {
                    write!(f, ", mod_revision: {}", rev)?;
                }
                if let Some(ver) = version {
                    write!(f, ", version: {}", ver)?;
                }
                write!(f, ")")
            }
        }
    }
}
