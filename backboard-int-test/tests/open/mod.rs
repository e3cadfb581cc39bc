mod schema_upgrade_test;
mod upgrade_callback_test;
