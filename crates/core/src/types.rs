/// Opaque job identifier assigned by the remote job service at creation.
pub type JobId = String;

/// Identifier of the user who submitted a job.
pub type OwnerId = String;

/// Milliseconds since the Unix epoch. Only used for ordering.
pub type EpochMillis = i64;
