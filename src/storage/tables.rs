use redb::TableDefinition;

/// File records: uuid -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Digest index: hex sha256 -> msgpack Vec of file UUIDs
pub const DIGEST_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("digest_files");

/// Locator index: storage locator -> msgpack Vec of file UUIDs
pub const LOCATOR_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("locator_files");

/// Project index: decimal project id -> msgpack Vec of file UUIDs
pub const PROJECT_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("project_files");

/// Users: identity-provider uid -> User (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Projects: id -> Project (msgpack)
pub const PROJECTS: TableDefinition<u64, &[u8]> = TableDefinition::new("projects");

/// API keys: id -> ApiKey (msgpack)
pub const API_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("api_keys");

/// API key lookup: key value -> api key id
pub const API_KEY_VALUES: TableDefinition<&str, u64> = TableDefinition::new("api_key_values");

/// API usage log: (owner uid, usage id) -> ApiUsage (msgpack)
pub const API_USAGE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("api_usage");

/// Monotonic id sequences: sequence name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
