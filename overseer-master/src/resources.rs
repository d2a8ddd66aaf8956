pub(crate) const BASE_REGISTER_PATH: &str = "/cluster/register";
pub(crate) const BASE_NODE_PATH: &str = "/cluster/nodes";
pub(crate) const BASE_CONF_PATH: &str = "/cluster/conf/base";
pub(crate) const STATE_CONF_PATH: &str = "/cluster/conf/state";

pub(crate) fn join_path(base: &str, suffix: &str) -> String {
    format!("{}/{}", base, suffix)
}

/// Path the master writes a node's assigned conf to.
pub(crate) fn node_sync_path(node: &str) -> String {
    join_path(&join_path(BASE_NODE_PATH, node), "sync")
}
