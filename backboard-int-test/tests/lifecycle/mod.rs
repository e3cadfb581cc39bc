mod delete_test;
mod pubsub_test;
