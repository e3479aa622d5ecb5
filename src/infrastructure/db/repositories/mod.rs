pub mod resource_repository_sqlx;
