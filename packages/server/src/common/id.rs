//! Identifier helpers.

use uuid::Uuid;

/// Time-ordered id for queue entries.
///
/// Lexical order of the canonical form matches creation order, which the
/// queue relies on for FIFO tie-breaks between equal priorities.
pub fn job_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_sort_in_creation_order() {
        let a = job_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = job_id();
        assert!(a.to_string() < b.to_string());
    }
}
