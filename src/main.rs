use actix_web::{
    self,
    middleware::{from_fn, Logger},
    web, App, HttpServer,
};
use std::sync::{Arc, LazyLock};

use crate::{
    configs::{connect_database, connect_redis},
    constants::StoreBackend,
    middlewares::authentication,
    modules::{
        conversation::repository_pg::ConversationRepositoryPg,
        notification::notifier::RedisNotifier,
        relationship::{
            fanout::{FanoutQueue, NotificationFanout, RetryPolicy},
            repository::RelationshipStore,
            repository_memory::RelationshipStoreMemory,
            repository_pg::RelationshipRepositoryPg,
            service::RelationshipService,
        },
        user::repository_pg::UserRepositoryPg,
    },
};

mod api;
mod configs;
mod constants;
mod middlewares;
mod modules;
#[cfg(test)]
mod test;
mod utils;

pub static ENV: LazyLock<constants::Env> = LazyLock::new(|| {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("Environment variables loaded from .env file");
    constants::Env::default()
});

#[actix_web::get("/")]
async fn health_check() -> &'static str {
    "Server is running"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let db_pool =
        connect_database().await.map_err(|_| std::io::Error::other("Database connection error"))?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| std::io::Error::other(format!("Migration error: {e}")))?;

    let redis_pool =
        connect_redis().map_err(|_| std::io::Error::other("Redis connection error"))?;

    let user_repo = Arc::new(UserRepositoryPg::new(db_pool.clone()));
    let store: Arc<dyn RelationshipStore> = match ENV.relationship_store {
        StoreBackend::Postgres => Arc::new(RelationshipRepositoryPg::new(db_pool.clone())),
        StoreBackend::Memory => {
            log::warn!("Relationships are kept in memory and will not survive a restart");
            Arc::new(RelationshipStoreMemory::new())
        }
    };

    let (queue, receiver) = FanoutQueue::channel();
    let fanout = NotificationFanout::with_dependencies(
        user_repo.clone(),
        Arc::new(RedisNotifier::new(redis_pool)),
        Arc::new(ConversationRepositoryPg::new(db_pool.clone())),
        RetryPolicy { max_attempts: ENV.fanout_max_attempts, backoff: ENV.fanout_retry_backoff },
    );
    let fanout_worker = fanout.spawn(receiver);

    let relationship_service =
        RelationshipService::with_dependencies(store, user_repo, queue, ENV.store_timeout);

    log::info!("Starting server at http://{}:{}", ENV.ip.as_str(), ENV.port);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(relationship_service.clone()))
            .service(health_check)
            .service(
                web::scope("/api")
                    .wrap(from_fn(authentication))
                    .configure(modules::relationship::route::configure),
            )
    })
    .bind((ENV.ip.as_str(), ENV.port))?
    .workers(2)
    .run();

    server.await?;

    // Queue handles go away with the server's app data; give the worker time to drain.
    match tokio::time::timeout(ENV.store_timeout, fanout_worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Fanout worker ended abnormally: {}", e),
        Err(_) => log::warn!("Fanout worker still busy at shutdown, pending notifications dropped"),
    }
    Ok(())
}
