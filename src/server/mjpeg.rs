//! `multipart/x-mixed-replace` encoding of the frame slot.
//!
//! Browsers render this natively: point an `<img>` at the endpoint and each
//! part replaces the previous image.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use tracing::debug;

use crate::pipeline::FrameSlot;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// One multipart section: boundary, part header, payload, terminator.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + 2);
    part.put_slice(PART_HEADER);
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Infinite per-viewer sequence of multipart sections.
///
/// Each poll reads the slot; while it is empty the stream sleeps for
/// `backoff` and tries again. The stream only ends when the transport drops
/// it, which is how client disconnects are observed.
pub fn frame_stream(
    slot: Arc<FrameSlot>,
    backoff: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let viewer = ViewerGuard::connect();
    stream::unfold((slot, viewer), move |(slot, viewer)| async move {
        loop {
            match slot.read() {
                Some(frame) => {
                    // Let other connections run between back-to-back parts
                    tokio::task::yield_now().await;
                    return Some((Ok(encode_part(&frame.data)), (slot, viewer)));
                }
                None => tokio::time::sleep(backoff).await,
            }
        }
    })
}

/// Full HTTP response for one viewer.
pub fn response(slot: Arc<FrameSlot>, backoff: Duration) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(frame_stream(slot, backoff)),
    )
        .into_response()
}

/// Tracks one live viewer; dropped together with the response body.
struct ViewerGuard;

impl ViewerGuard {
    fn connect() -> Self {
        metrics::gauge!("skyview_viewers_active").increment(1.0);
        debug!("Viewer connected");
        ViewerGuard
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        metrics::gauge!("skyview_viewers_active").decrement(1.0);
        debug!("Viewer disconnected");
    }
}
