//! The service provider: owns one dispatcher task per registered service
//! and exposes the `call` entrypoint callers use to submit work.
//!
//! Grounded on `elm/ords/services/provider.py`'s `_RunningProvider` (the
//! `submit_jobs`/`collect_responses` loop) and `RunningAsyncServices` (the
//! `async with` scope that tears queues down on exit). Rust has no
//! async-aware `Drop`, so the "always release resources, even on error"
//! guarantee is provided by [`ServiceProvider::scoped`] taking an async
//! closure rather than by a destructor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::queue::{JobEnvelope, DEFAULT_QUEUE_CAPACITY};
use super::{Service, ServiceRequest, ServiceResponse};
use crate::error::OrdsError;

struct RegisteredService {
    service: Arc<dyn Service>,
    sender: Option<mpsc::Sender<JobEnvelope>>,
    dispatcher: tokio::task::JoinHandle<()>,
}

/// Owns the running dispatcher loops for a fixed set of services for the
/// lifetime of a pipeline run.
pub struct ServiceProvider {
    services: HashMap<&'static str, RegisteredService>,
}

impl ServiceProvider {
    /// Start dispatcher tasks for every service and call `acquire_resources`
    /// on each. Mirrors `RunningAsyncServices.__aenter__`.
    pub async fn start(services: Vec<Arc<dyn Service>>) -> anyhow::Result<Self> {
        anyhow::ensure!(!services.is_empty(), "must provide at least one service");

        let mut registered = HashMap::with_capacity(services.len());
        for service in services {
            service.acquire_resources().await?;

            let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
            let dispatcher_service = Arc::clone(&service);
            let dispatcher = tokio::spawn(run_dispatcher(dispatcher_service, rx));

            registered.insert(
                service.name(),
                RegisteredService {
                    service,
                    sender: Some(tx),
                    dispatcher,
                },
            );
        }

        Ok(Self {
            services: registered,
        })
    }

    /// Submit `request` to the named service's queue and await its
    /// response. Mirrors `Service.call`.
    pub async fn call(&self, service_name: &str, request: ServiceRequest) -> anyhow::Result<ServiceResponse> {
        let entry = self
            .services
            .get(service_name)
            .ok_or_else(|| OrdsError::ServiceNotInitialized(service_name.to_string()))?;
        let sender = entry
            .sender
            .as_ref()
            .ok_or_else(|| OrdsError::ServiceNotInitialized(service_name.to_string()))?;

        let (respond_to, response) = tokio::sync::oneshot::channel();
        sender
            .send(JobEnvelope { respond_to, request })
            .await
            .map_err(|_| OrdsError::ServiceNotInitialized(service_name.to_string()))?;

        response
            .await
            .map_err(|_| anyhow::anyhow!("service {service_name:?} dropped the response channel"))?
    }

    /// Close every service's queue, wait for its dispatcher to drain and
    /// exit, then run `release_resources` on each — regardless of whether
    /// `body` succeeded. Mirrors `RunningAsyncServices.__aexit__`'s
    /// `try/finally`.
    pub async fn scoped<F, Fut, T>(services: Vec<Arc<dyn Service>>, body: F) -> anyhow::Result<T>
    where
        F: FnOnce(Arc<ServiceProvider>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let provider = Arc::new(Self::start(services).await?);
        let result = body(Arc::clone(&provider)).await;

        let teardown = Arc::try_unwrap(provider)
            .unwrap_or_else(|_| panic!("service provider still referenced at scope exit"))
            .shut_down()
            .await;

        result.and(teardown)
    }

    async fn shut_down(mut self) -> anyhow::Result<()> {
        for entry in self.services.values_mut() {
            entry.sender = None; // closes the channel; dispatcher drains and exits
        }
        for (_, entry) in self.services.drain() {
            let _ = entry.dispatcher.await;
            entry.service.release_resources().await?;
        }
        Ok(())
    }
}

/// One service's submit/collect loop, running for the dispatcher's whole
/// lifetime. Exits once the sender half is dropped and all in-flight jobs
/// have been collected.
async fn run_dispatcher(service: Arc<dyn Service>, mut queue: mpsc::Receiver<JobEnvelope>) {
    let mut jobs = JoinSet::new();
    let mut closed = false;

    while !closed || !jobs.is_empty() {
        closed = submit_jobs(&service, &mut queue, &mut jobs, closed).await;
        collect_one_response(&mut jobs).await;
    }
}

/// Pull and spawn jobs while `can_process` holds, per `_RunningProvider`'s
/// rule: if the queue is empty and jobs are already in flight, return
/// immediately rather than blocking on the next submission so
/// `collect_responses` gets a chance to run.
async fn submit_jobs(
    service: &Arc<dyn Service>,
    queue: &mut mpsc::Receiver<JobEnvelope>,
    jobs: &mut JoinSet<()>,
    already_closed: bool,
) -> bool {
    if already_closed || !service.can_process() {
        return already_closed;
    }

    loop {
        let envelope = match queue.try_recv() {
            Ok(envelope) => envelope,
            Err(mpsc::error::TryRecvError::Empty) => {
                if !jobs.is_empty() {
                    return false;
                }
                match queue.recv().await {
                    Some(envelope) => envelope,
                    None => return true,
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => return true,
        };

        spawn_job(service, jobs, envelope);

        if jobs.len() >= service.max_concurrent_jobs() || !service.can_process() {
            return false;
        }
        tokio::task::yield_now().await;
    }
}

fn spawn_job(service: &Arc<dyn Service>, jobs: &mut JoinSet<()>, envelope: JobEnvelope) {
    let service = Arc::clone(service);
    jobs.spawn(async move {
        let JobEnvelope { respond_to, request } = envelope;
        let result = service.process(request).await;
        let _ = respond_to.send(result);
    });
}

/// Block further submissions until at least one in-flight job finishes.
async fn collect_one_response(jobs: &mut JoinSet<()>) {
    if jobs.is_empty() {
        return;
    }
    let _ = jobs.join_next().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn process(&self, request: ServiceRequest) -> anyhow::Result<ServiceResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request {
                ServiceRequest::Llm { messages, .. } => {
                    Ok(ServiceResponse::Llm(Some(format!("{messages:?}"))))
                }
                _ => anyhow::bail!("unsupported request for echo service"),
            }
        }
    }

    #[tokio::test]
    async fn call_round_trips_through_the_dispatcher() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = Arc::new(Echo { calls: calls.clone() });

        let result = ServiceProvider::scoped(vec![service], |provider| async move {
            let response = provider
                .call(
                    "echo",
                    ServiceRequest::Llm {
                        messages: vec![crate::llm::ChatMessage::user("hi")],
                        model: "test-model".into(),
                        usage_tracker: None,
                        usage_sub_label: None,
                        timeout: std::time::Duration::from_secs(30),
                    },
                )
                .await?
                .into_llm()?
                .expect("echo service always returns Some");
            assert!(response.contains("hi"));
            Ok(())
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_service_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = Arc::new(Echo { calls });

        let result = ServiceProvider::scoped(vec![service], |provider| async move {
            provider
                .call("not-registered", ServiceRequest::ThreadPool { input: serde_json::json!(null) })
                .await
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn release_resources_runs_even_when_body_errors() {
        struct Tracked {
            released: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Service for Tracked {
            fn name(&self) -> &'static str {
                "tracked"
            }

            async fn process(&self, _request: ServiceRequest) -> anyhow::Result<ServiceResponse> {
                unreachable!("not called in this test")
            }

            async fn release_resources(&self) -> anyhow::Result<()> {
                self.released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let released = Arc::new(AtomicUsize::new(0));
        let service = Arc::new(Tracked { released: released.clone() });

        let result: anyhow::Result<()> = ServiceProvider::scoped(vec![service], |_provider| async move {
            anyhow::bail!("body failed")
        })
        .await;

        assert!(result.is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
