#![allow(dead_code)]

use std::{
    error::Error,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use rust_lease_locker::{
    lease::{Attributes, BasicLeaseRequest, DecodeError, LeaseRequest},
    logger::{LeaseEvent, LeaseFailure, LeaseLogger},
};

pub async fn get_etcd_client() -> etcd_client::Client {
    etcd_client::Client::connect(["http://localhost:2379"], None)
        .await
        .expect("failed to connect to etcd")
}

pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn request(lessee_id: &str, duration: Duration) -> Arc<BasicLeaseRequest<Attributes>> {
    Arc::new(BasicLeaseRequest::new(lessee_id, duration))
}

///
/// Request whose payload can never be decoded.
///
pub struct UndecodableRequest;

impl LeaseRequest for UndecodableRequest {
    type Payload = ();

    fn lessee_id(&self) -> &str {
        "undecodable"
    }

    fn lease_duration(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn decode_payload(&self, _attributes: Attributes) -> Result<(), DecodeError> {
        Err(DecodeError::new("payload requires attributes"))
    }
}

///
/// Request asking to hold its lease until released.
///
pub struct ForeverRequest;

impl LeaseRequest for ForeverRequest {
    type Payload = ();

    fn lessee_id(&self) -> &str {
        "forever"
    }

    fn lease_duration(&self) -> Duration {
        Duration::MAX
    }

    fn decode_payload(&self, _attributes: Attributes) -> Result<(), DecodeError> {
        Ok(())
    }
}

///
/// Request whose payload decodes `good_decodes` times, then fails. The payload is the
/// decode attempt number, starting at 1.
///
pub struct DecodesUntilRequest {
    good_decodes: usize,
    decodes: AtomicUsize,
}

impl DecodesUntilRequest {
    pub fn new(good_decodes: usize) -> Self {
        Self {
            good_decodes,
            decodes: AtomicUsize::new(0),
        }
    }
}

impl LeaseRequest for DecodesUntilRequest {
    type Payload = usize;

    fn lessee_id(&self) -> &str {
        "Y"
    }

    fn lease_duration(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn decode_payload(&self, _attributes: Attributes) -> Result<usize, DecodeError> {
        let attempt = self.decodes.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.good_decodes {
            return Err(DecodeError::new("item schema changed"));
        }
        Ok(attempt)
    }
}

#[derive(Default)]
pub struct RecordingLogger {
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl LeaseLogger for RecordingLogger {
    fn log_info(&self, event: LeaseEvent<'_>) {
        let line = match event {
            LeaseEvent::Obtained {
                lessee_id, item_id, ..
            } => format!("obtained {lessee_id} {item_id}"),
            LeaseEvent::NotObtained { lessee_id, .. } => format!("not-obtained {lessee_id}"),
            LeaseEvent::Renewed {
                lessee_id, item_id, ..
            } => format!("renewed {lessee_id} {item_id}"),
            LeaseEvent::Lost { lessee_id, item_id } => format!("lost {lessee_id} {item_id}"),
            LeaseEvent::HeartbeatStopped { lessee_id, item_id } => {
                format!("stopped {lessee_id} {item_id}")
            }
        };
        self.infos.lock().unwrap().push(line);
    }

    fn log_error(&self, failure: LeaseFailure<'_>, error: &(dyn Error + 'static)) {
        let line = match failure {
            LeaseFailure::Obtain { lessee_id, .. } => format!("obtain {lessee_id}: {error}"),
            LeaseFailure::Renew { lessee_id, item_id } => {
                format!("renew {lessee_id} {item_id}: {error}")
            }
        };
        self.errors.lock().unwrap().push(line);
    }
}
