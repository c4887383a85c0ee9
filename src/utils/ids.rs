use uuid::Uuid;

/// Random lowercase hex identifier, at most 32 characters long.
pub fn random_identifier(length: usize) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(length.min(32));
    id
}
