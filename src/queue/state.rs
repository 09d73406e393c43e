use std::{collections::VecDeque, mem};

use tidebus_error::StackError;
use tokio::sync::oneshot;

use crate::pubsub::{Event, SubscriptionId};

/// Ответ на запрос потребителя.
#[derive(Debug)]
pub(crate) enum Pull {
    Event(Event),
    End,
    Failed(StackError),
}

/// Что произошло с событием, переданным в очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// Отдано самому старому ожидающему запросу.
    Delivered,
    /// Запросов нет, событие буферизовано.
    Buffered,
    /// Очередь закрыта, событие отброшено.
    Discarded,
}

/// Немедленный ответ или приёмник, который получит ответ позже.
#[derive(Debug)]
pub(crate) enum PullOutcome {
    Ready(Pull),
    Wait(oneshot::Receiver<Pull>),
}

/// Состояние очереди доставки.
///
/// Два буфера: события, пришедшие раньше запросов, и запросы, пришедшие
/// раньше событий. Пока очередь работает, хотя бы один из них пуст.
#[derive(Debug)]
pub(crate) struct QueueState {
    running: bool,
    deliveries: VecDeque<Event>,
    pulls: VecDeque<oneshot::Sender<Pull>>,
    failure: Option<StackError>,
    handles: Vec<SubscriptionId>,
}

impl QueueState {
    pub(crate) fn new() -> Self {
        Self {
            running: true,
            deliveries: VecDeque::new(),
            pulls: VecDeque::new(),
            failure: None,
            handles: Vec::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn pending_deliveries(&self) -> usize {
        self.deliveries.len()
    }

    /// Число запросов, которые ещё ждут событие.
    pub(crate) fn pending_pulls(&self) -> usize {
        self.pulls.iter().filter(|p| !p.is_closed()).count()
    }

    pub(crate) fn set_handles(
        &mut self,
        handles: Vec<SubscriptionId>,
    ) {
        self.handles = handles;
    }

    pub(crate) fn push(
        &mut self,
        event: Event,
    ) -> PushOutcome {
        if !self.running {
            return PushOutcome::Discarded;
        }

        // Запросы, брошенные потребителем, пропускаются.
        let mut pending = Pull::Event(event);
        while let Some(waiter) = self.pulls.pop_front() {
            match waiter.send(pending) {
                Ok(()) => return PushOutcome::Delivered,
                Err(returned) => pending = returned,
            }
        }

        if let Pull::Event(event) = pending {
            self.deliveries.push_back(event);
        }
        PushOutcome::Buffered
    }

    pub(crate) fn pull(&mut self) -> PullOutcome {
        if let Some(failure) = self.failure.take() {
            return PullOutcome::Ready(Pull::Failed(failure));
        }
        if !self.running {
            return PullOutcome::Ready(Pull::End);
        }
        if let Some(event) = self.deliveries.pop_front() {
            return PullOutcome::Ready(Pull::Event(event));
        }

        let (tx, rx) = oneshot::channel();
        self.pulls.push_back(tx);
        PullOutcome::Wait(rx)
    }

    /// Останавливает очередь. Ожидающие запросы получают конец
    /// последовательности или ошибку, буфер событий очищается.
    ///
    /// Если ошибку некому отдать сейчас, она сохраняется для следующего
    /// запроса. Возвращает регистрации для снятия или `None`, если очередь
    /// уже была остановлена.
    pub(crate) fn close(
        &mut self,
        failure: Option<StackError>,
    ) -> Option<Vec<SubscriptionId>> {
        if !self.running {
            return None;
        }
        self.running = false;
        self.deliveries.clear();

        let mut failure_delivered = false;
        for waiter in self.pulls.drain(..) {
            let reply = match &failure {
                Some(err) => Pull::Failed(err.clone()),
                None => Pull::End,
            };
            if waiter.send(reply).is_ok() && failure.is_some() {
                failure_delivered = true;
            }
        }
        if !failure_delivered {
            self.failure = failure;
        }

        Some(mem::take(&mut self.handles))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
