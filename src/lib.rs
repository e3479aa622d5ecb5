// Module layout (Clean Architecture style)
// - bootstrap: configuration, logging and the application lifecycle
// - infrastructure: database adapter
// - presentation: HTTP handlers and routing
// - application: ports and business services

pub mod application;
pub mod bootstrap;
pub mod infrastructure;
pub mod presentation;
