mod event;
mod lifecycle;
mod open;
mod transaction;

#[ctor::ctor]
fn init() {
    colog::init();
}
