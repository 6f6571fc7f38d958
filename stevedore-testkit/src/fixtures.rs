use stevedore::{Job, PortSpec, Protocol};

/// A web-ish job with one dynamically allocated tcp port named `http`.
pub fn web_job() -> Job {
    Job::new("example/web:1")
        .with_command(["/bin/server"])
        .with_port("http", PortSpec::dynamic(80, Protocol::Tcp))
}

/// A job demanding a specific host port for its `http` port.
pub fn fixed_port_job(external: u16) -> Job {
    Job::new("example/web:1")
        .with_port("http", PortSpec::fixed(80, Protocol::Tcp, external))
}
