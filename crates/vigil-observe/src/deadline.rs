//! Bounded waits
//!
//! The multiplexer never times out on its own; these combinators race a
//! wait against a page timer. The losing side is abandoned, not cancelled:
//! a resolution arriving after the deadline finds the continuation already
//! spent and is ignored.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use vigil_dom::{NodeId, Page, SelectorError};

use crate::waiter::ElementWaiter;

/// Deadline elapsed before the wait resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out waiting for element")]
pub struct WaitTimeout;

/// Continuation-passing bounded wait: resolves with the element or rejects
/// with [`WaitTimeout`], exactly once.
pub fn bounded_wait(
    page: &Rc<Page>,
    waiter: &ElementWaiter,
    selector: &str,
    require_visible: bool,
    ignore_width: bool,
    timeout_ms: u64,
    callback: Box<dyn FnOnce(Result<NodeId, WaitTimeout>)>,
) -> Result<(), SelectorError> {
    let settled = Rc::new(Cell::new(false));
    let slot = Rc::new(RefCell::new(Some(callback)));

    let settled_wait = settled.clone();
    let slot_wait = slot.clone();
    waiter.wait_with(
        selector,
        require_visible,
        ignore_width,
        Box::new(move |element| {
            if settled_wait.replace(true) {
                return;
            }
            if let Some(callback) = slot_wait.borrow_mut().take() {
                callback(Ok(element));
            }
        }),
    )?;
    if settled.get() {
        // immediate match, no timer needed
        return Ok(());
    }

    let selector = selector.to_string();
    page.timers().set_timeout(
        timeout_ms,
        Box::new(move || {
            if settled.replace(true) {
                return;
            }
            tracing::trace!(selector = %selector, timeout_ms, "bounded wait timed out");
            if let Some(callback) = slot.borrow_mut().take() {
                callback(Err(WaitTimeout));
            }
        }),
    );
    Ok(())
}

/// Race any future against a page timer
pub fn deadline<F>(page: &Page, timeout_ms: u64, future: F) -> Deadline<F>
where
    F: Future + Unpin,
{
    let slot = Rc::new(RefCell::new(DeadlineSlot::default()));
    let timer_slot = slot.clone();
    page.timers().set_timeout(
        timeout_ms,
        Box::new(move || {
            let mut state = timer_slot.borrow_mut();
            state.expired = true;
            let waker = state.waker.take();
            drop(state);
            if let Some(waker) = waker {
                waker.wake();
            }
        }),
    );
    Deadline { future, slot }
}

#[derive(Default)]
struct DeadlineSlot {
    expired: bool,
    waker: Option<Waker>,
}

/// Future racing an inner future against a deadline
pub struct Deadline<F> {
    future: F,
    slot: Rc<RefCell<DeadlineSlot>>,
}

impl<F> Future for Deadline<F>
where
    F: Future + Unpin,
{
    type Output = Result<F::Output, WaitTimeout>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(value) = Pin::new(&mut this.future).poll(cx) {
            return Poll::Ready(Ok(value));
        }
        let mut slot = this.slot.borrow_mut();
        if slot.expired {
            return Poll::Ready(Err(WaitTimeout));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostProfile;
    use vigil_runtime::ExtensionContext;

    fn setup(page: &Rc<Page>) -> ElementWaiter {
        ElementWaiter::new(page.clone(), ExtensionContext::new(), &HostProfile::default()).unwrap()
    }

    fn insert_title(page: &Page) -> NodeId {
        let mut doc = page.document_mut();
        let body = doc.body().unwrap();
        let node = doc.create_element("div");
        doc.set_attr(node, "class", "title");
        doc.append_child(body, node);
        node
    }

    #[test]
    fn test_bounded_wait_resolves() {
        let page = Page::new("https://host/");
        let waiter = setup(&page);

        let outcome = Rc::new(RefCell::new(None));
        let outcome2 = outcome.clone();
        bounded_wait(
            &page,
            &waiter,
            ".title",
            false,
            false,
            1000,
            Box::new(move |result| *outcome2.borrow_mut() = Some(result)),
        )
        .unwrap();

        let inserted = insert_title(&page);
        page.flush();
        assert_eq!(*outcome.borrow(), Some(Ok(inserted)));

        // the deadline firing later is a no-op
        page.advance(2000);
        assert_eq!(*outcome.borrow(), Some(Ok(inserted)));
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let page = Page::new("https://host/");
        let waiter = setup(&page);

        let outcome = Rc::new(RefCell::new(None));
        let outcome2 = outcome.clone();
        bounded_wait(
            &page,
            &waiter,
            ".title",
            false,
            false,
            500,
            Box::new(move |result| *outcome2.borrow_mut() = Some(result)),
        )
        .unwrap();

        page.advance(499);
        assert_eq!(*outcome.borrow(), None);
        page.advance(1);
        assert_eq!(*outcome.borrow(), Some(Err(WaitTimeout)));

        // the abandoned wait resolving later is ignored
        insert_title(&page);
        page.flush();
        assert_eq!(*outcome.borrow(), Some(Err(WaitTimeout)));
    }

    #[test]
    fn test_deadline_future() {
        let page = Page::new("https://host/");
        let waiter = setup(&page);

        let wait = waiter.wait_for_element(".title", false, false).unwrap();
        let mut race = deadline(&page, 300, wait);
        assert_eq!(smol::block_on(smol::future::poll_once(&mut race)), None);

        page.advance(300);
        assert_eq!(smol::block_on(race), Err(WaitTimeout));
    }

    #[test]
    fn test_deadline_future_wins() {
        let page = Page::new("https://host/");
        let waiter = setup(&page);

        let wait = waiter.wait_for_element(".title", false, false).unwrap();
        let race = deadline(&page, 300, wait);

        let inserted = insert_title(&page);
        page.flush();
        assert_eq!(smol::block_on(race), Ok(inserted));
    }
}
