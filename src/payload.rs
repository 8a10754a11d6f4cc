use rand::distr::Alphanumeric;
use rand::Rng;

// Random payload generation is an injected capability, not a detail of the
// workload, so deterministic sources can be swapped in for tests.
pub trait PayloadSource: Send + Sync {
    fn string(&self, len: usize) -> String;
}

// Default source: alphanumeric noise from the thread-local generator. The
// content is irrelevant to the server under test, only the size matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphanumericPayload;

impl PayloadSource for AlphanumericPayload {
    fn string(&self, len: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}
