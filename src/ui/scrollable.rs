//! Reaction-driven paging.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::reactable::Reactable;
use super::session::{
    MessageRef, SessionContext, SessionEvent, SessionHandle, SessionRegistry, SessionSurface,
};
use crate::error::SessionError;
use crate::Error;

pub const SCROLL_LEFT: &str = "⬅️";
pub const SCROLL_RIGHT: &str = "➡️";

/// Page position shared by a scrollable's handlers.
pub struct Pager<T> {
    page: AtomicUsize,
    pages: usize,
    pub data: T,
}

impl<T> Pager<T> {
    pub fn new(data: T, pages: usize) -> Self {
        Self {
            page: AtomicUsize::new(0),
            pages: pages.max(1),
            data,
        }
    }

    pub fn page(&self) -> usize {
        self.page.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Move by one page, clamped to `[0, pages)`. Returns the new page if it
    /// changed.
    fn step(&self, forward: bool) -> Option<usize> {
        let last = self.pages - 1;
        let next = |page: usize| {
            if forward {
                (page < last).then_some(page + 1)
            } else {
                page.checked_sub(1)
            }
        };
        self.page
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, next)
            .ok()
            .and_then(next)
    }
}

/// A message paged with ⬅️ and ➡️ reactions.
///
/// `render` is called with the new page index whenever a reaction moves the
/// page; presses past either end are ignored.
pub struct Scrollable<T, E> {
    reactable: Reactable<Pager<T>, E>,
}

impl<T, E> Scrollable<T, E>
where
    T: Send + Sync + 'static,
    E: SessionEvent,
{
    pub fn new<F, Fut>(data: T, pages: usize, render: F) -> Self
    where
        F: Fn(SessionContext<Pager<T>>, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let render = Arc::new(render);
        let mut reactable = Reactable::new(Pager::new(data, pages));

        for (emoji, forward) in [(SCROLL_LEFT, false), (SCROLL_RIGHT, true)] {
            let render = Arc::clone(&render);
            reactable.register(emoji, move |ctx: SessionContext<Pager<T>>, _event: E| {
                let moved = ctx.props.step(forward);
                let render = Arc::clone(&render);
                async move {
                    match moved {
                        Some(page) => render(ctx, page).await,
                        None => Ok(()),
                    }
                }
            });
        }

        Self { reactable }
    }

    pub fn pager(&self) -> &Arc<Pager<T>> {
        self.reactable.props()
    }

    pub fn on_removal<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SessionContext<Pager<T>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.reactable.on_removal(handler);
    }

    /// Add the navigation reactions and start paging.
    pub async fn activate(
        self,
        registry: Arc<SessionRegistry<E>>,
        surface: Arc<dyn SessionSurface>,
        message: MessageRef,
        duration: Duration,
    ) -> Result<SessionHandle, SessionError> {
        self.reactable
            .activate(registry, surface, message, true, duration)
            .await
    }
}
