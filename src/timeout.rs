//! Idle-timeout wrapper for upstream response bodies.
//!
//! Each read from the upstream must produce a frame within the configured
//! window; a stalled upstream fails only the request it belongs to. The
//! deadline is re-armed after every frame, so long-lived event streams
//! stay alive as long as they keep producing.

use bytes::Bytes;
use http_body::{Body, Frame};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Sleep, sleep};

/// Body wrapper that fails the stream when the inner body goes quiet for
/// longer than `idle`.
pub struct IdleTimeoutBody<B> {
    inner: B,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
    armed: bool,
}

impl<B> IdleTimeoutBody<B> {
    /// Wrap `inner`, failing any read that takes longer than `idle`.
    pub fn new(inner: B, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            deadline: Box::pin(sleep(idle)),
            armed: false,
        }
    }
}

impl<B> Body for IdleTimeoutBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        // Arm the deadline on first poll rather than at construction, so
        // time spent between forward() and the first read doesn't count.
        if !this.armed {
            this.armed = true;
            this.deadline
                .as_mut()
                .reset(tokio::time::Instant::now() + this.idle);
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            let idle = this.idle;
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("upstream produced no data for {idle:?}"),
            )
            .into())));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(result) => {
                this.deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + this.idle);
                Poll::Ready(result.map(|r| r.map_err(Into::into)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}
