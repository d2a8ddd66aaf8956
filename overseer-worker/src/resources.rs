pub(crate) const BASE_REGISTER_PATH: &str = "/cluster/register";
pub(crate) const BASE_NODE_PATH: &str = "/cluster/nodes";

pub(crate) fn join_path(base: &str, suffix: &str) -> String {
    format!("{}/{}", base, suffix)
}

/// Path the master writes this node's assigned conf to.
pub(crate) fn node_sync_path(node: &str) -> String {
    join_path(&join_path(BASE_NODE_PATH, node), "sync")
}

/// Path this node acks its applied conf to, guarded by the store lock.
pub(crate) fn node_current_path(node: &str) -> String {
    join_path(&join_path(BASE_NODE_PATH, node), "current")
}
