//! Framing for bus connections that cross a process boundary. A client's
//! connection sends exactly one control frame before it settles into its
//! role: `Subscribe` to become a read-only tap the broker forwards matching
//! `Message`s to (unframed, one JSON object per line), or repeated
//! `Publish` frames to feed the broker's hub.

use serde::{Deserialize, Serialize};

use super::payload::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireFrame {
    #[serde(rename = "publish")]
    Publish { message: Message },
    #[serde(rename = "subscribe")]
    Subscribe { prefix: String },
}
