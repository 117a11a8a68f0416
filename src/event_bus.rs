/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the node's service threads and
//! invokes the handlers registered for them, in the order in which the events were published.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) chain_start_handlers: Vec<HandlerPtr<ChainStartEvent>>,
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) update_head_handlers: Vec<HandlerPtr<UpdateHeadEvent>>,
    pub(crate) receive_block_handlers: Vec<HandlerPtr<ReceiveBlockEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) send_sync_response_handlers: Vec<HandlerPtr<SendSyncResponseEvent>>,
}

impl EventHandlers {
    /// Collect the user-defined handlers, and if `log_events` is set, the default logger of every
    /// event type.
    pub(crate) fn new(
        log_events: bool,
        chain_start_handler: Option<HandlerPtr<ChainStartEvent>>,
        insert_block_handler: Option<HandlerPtr<InsertBlockEvent>>,
        update_head_handler: Option<HandlerPtr<UpdateHeadEvent>>,
        receive_block_handler: Option<HandlerPtr<ReceiveBlockEvent>>,
        reject_block_handler: Option<HandlerPtr<RejectBlockEvent>>,
        start_sync_handler: Option<HandlerPtr<StartSyncEvent>>,
        end_sync_handler: Option<HandlerPtr<EndSyncEvent>>,
        receive_sync_request_handler: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
        send_sync_response_handler: Option<HandlerPtr<SendSyncResponseEvent>>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers: Vec<HandlerPtr<T>> = user_handler.into_iter().collect();
            if log_events {
                handlers.push(T::get_logger())
            }
            handlers
        }

        EventHandlers {
            chain_start_handlers: handlers(log_events, chain_start_handler),
            insert_block_handlers: handlers(log_events, insert_block_handler),
            update_head_handlers: handlers(log_events, update_head_handler),
            receive_block_handlers: handlers(log_events, receive_block_handler),
            reject_block_handlers: handlers(log_events, reject_block_handler),
            start_sync_handlers: handlers(log_events, start_sync_handler),
            end_sync_handlers: handlers(log_events, end_sync_handler),
            receive_sync_request_handlers: handlers(log_events, receive_sync_request_handler),
            send_sync_response_handlers: handlers(log_events, send_sync_response_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chain_start_handlers.is_empty()
            && self.insert_block_handlers.is_empty()
            && self.update_head_handlers.is_empty()
            && self.receive_block_handlers.is_empty()
            && self.reject_block_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ChainStart(chain_start_event) =>
                self.chain_start_handlers.iter().for_each(|handler| handler(&chain_start_event)),

            Event::InsertBlock(insert_block_event) =>
                self.insert_block_handlers.iter().for_each(|handler| handler(&insert_block_event)),

            Event::UpdateHead(update_head_event) =>
                self.update_head_handlers.iter().for_each(|handler| handler(&update_head_event)),

            Event::ReceiveBlock(receive_block_event) =>
                self.receive_block_handlers.iter().for_each(|handler| handler(&receive_block_event)),

            Event::RejectBlock(reject_block_event) =>
                self.reject_block_handlers.iter().for_each(|handler| handler(&reject_block_event)),

            Event::StartSync(start_sync_event) =>
                self.start_sync_handlers.iter().for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) =>
                self.end_sync_handlers.iter().for_each(|handler| handler(&end_sync_event)),

            Event::ReceiveSyncRequest(receive_sync_request_event) =>
                self.receive_sync_request_handlers.iter().for_each(|handler| handler(&receive_sync_request_event)),

            Event::SendSyncResponse(send_sync_response_event) =>
                self.send_sync_response_handlers.iter().for_each(|handler| handler(&send_sync_response_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher has shut down. Wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(10)),
        }
    })
}
