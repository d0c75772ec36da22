//! Processor Tasks - task queue consumer and event dispatch
//!
//! Every API request and every L2CAP upcall is a [`Task`] on one bounded
//! channel. The task processor is the only code that touches the signaling,
//! stream and channel tables; it runs each task to completion, answers API
//! requests on the response channel and forwards the notifications the task
//! produced to the event dispatcher.
//!
//! # Usage
//!
//! ```ignore
//! use bondybird_avdtp::{AvdtpOptions, processor};
//!
//! // In your Embassy task
//! processor::run(AvdtpOptions::default(), my_l2cap, |notification| {
//!     // react to ConnectInd, ConfigInd, StartCfm, ...
//! })
//! .await?;
//! ```
//!
//! The L2CAP binding reports its upcalls with [`post_l2cap_event`] from
//! synchronous callbacks or [`submit_l2cap_event`] from async code.
//!
//! # Architecture
//!
//! * **Task Processor**: consumes the task channel, owns the transport
//! * **Event Dispatcher**: delivers notifications to the [`AvdtpCallback`]

use crate::avdtp::{AvdtpCallback, Notification};
use crate::l2cap::{L2capEvent, L2capTransport};
use crate::{
    AVDTP_HOST, AvdtpError, AvdtpOptions, EVENT_CHANNEL, RESPONSE_CHANNEL, Response, TASK_CHANNEL,
    Task,
};

/// Queue an L2CAP upcall without waiting
///
/// # Errors
///
/// Returns `AvdtpError::NoResources` if the task channel is full
pub fn post_l2cap_event(event: L2capEvent) -> Result<(), AvdtpError> {
    TASK_CHANNEL
        .try_send(Task::Transport(event))
        .map_err(|_| AvdtpError::NoResources)
}

/// Queue an L2CAP upcall, waiting for room in the task channel
pub async fn submit_l2cap_event(event: L2capEvent) {
    TASK_CHANNEL.send(Task::Transport(event)).await;
}

/// Run one task against the host, returning the API response if the task was
/// a request
async fn process_task<T: L2capTransport>(transport: &mut T, task: Task) -> Option<Response> {
    let (response, mut notifications) = {
        let mut guard = AVDTP_HOST.lock().await;
        let Some(host) = guard.as_mut() else {
            error!("[PROCESSOR] AvdtpHost not initialized");
            return match task {
                Task::Api(_) => Some(Response::Error(AvdtpError::NotInitialized)),
                Task::Transport(_) => None,
            };
        };
        let response = match task {
            Task::Api(request) => Some(host.process_api_request(transport, request)),
            Task::Transport(event) => {
                host.process_l2cap_event(transport, event);
                None
            }
        };
        (response, host.take_notifications())
    };

    let sender = EVENT_CHANNEL.sender();
    while let Some(notification) = notifications.pop_front() {
        sender.send(notification).await;
    }
    response
}

async fn task_processor<T: L2capTransport>(transport: &mut T) {
    let task_receiver = TASK_CHANNEL.receiver();
    let response_sender = RESPONSE_CHANNEL.sender();

    loop {
        let task = task_receiver.receive().await;
        trace!("[PROCESSOR] task: {:?}", task);
        if let Some(response) = process_task(transport, task).await {
            debug!("[PROCESSOR] API response: {:?}", response);
            response_sender.send(response).await;
        }
    }
}

async fn event_dispatcher<C: AvdtpCallback>(callback: &mut C) {
    let receiver = EVENT_CHANNEL.receiver();

    loop {
        let notification: Notification = receiver.receive().await;
        debug!(
            "[PROCESSOR] event for {}: {:?}",
            notification.handle,
            notification.event
        );
        callback.on_event(notification);
    }
}

/// Run the AVDTP engine
///
/// Initializes the global host with `options` and then serves the task
/// channel forever, issuing L2CAP calls through `transport` and delivering
/// notifications to `callback`.
///
/// # Errors
///
/// Returns `AvdtpError::BadState` if the host was already initialized.
pub async fn run<T: L2capTransport, C: AvdtpCallback>(
    options: AvdtpOptions,
    mut transport: T,
    mut callback: C,
) -> Result<(), AvdtpError> {
    crate::init_avdtp_host(options).await?;
    info!("[PROCESSOR] AVDTP engine running");

    embassy_futures::select::select(
        task_processor(&mut transport),
        event_dispatcher(&mut callback),
    )
    .await;
    Ok(())
}
