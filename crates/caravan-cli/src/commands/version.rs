//! Version command

pub fn run(short: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if short {
        println!("{}", version);
    } else {
        println!("caravan {}", version);
    }
}
