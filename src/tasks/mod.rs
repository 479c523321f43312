mod heartbeat;

pub(crate) use heartbeat::HeartbeatHandle;
