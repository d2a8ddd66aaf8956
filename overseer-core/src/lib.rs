mod catalog;
pub use catalog::{Catalog, CatalogDelta};

mod program;
pub use program::{ProgramDefinition, RESERVED_KEYS};

mod conf;
pub use conf::{parse_conf, render_supervisor_conf, serialize_conf, ConfError};

mod notify;
pub use notify::{NotifyEvent, WebhookNotifier};
