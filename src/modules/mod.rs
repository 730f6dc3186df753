pub mod user {
    pub mod schema;
    pub mod repository;
    pub mod repository_pg;
}

pub mod conversation {
    pub mod schema;
    pub mod repository;
    pub mod repository_pg;
}

pub mod notification {
    pub mod event;
    pub mod notifier;
}

pub mod relationship {
    pub mod schema;
    pub mod model;
    pub mod error;
    pub mod repository;
    pub mod repository_memory;
    pub mod repository_pg;
    pub mod fanout;
    pub mod service;
    pub mod handle;
    pub mod route;
}
