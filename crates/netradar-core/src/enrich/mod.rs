// ── Enrichment ──
//
// Cross-collector inference: device classification and OS
// fingerprinting. Enrichment flows exclusively through the store's
// patch path -- it never revives a stale entity.

mod classifier;
mod os_fingerprint;

pub use classifier::Classifier;
pub use os_fingerprint::{OsFingerprinter, TtlWindow};
