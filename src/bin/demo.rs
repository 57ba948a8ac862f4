//! Example application binary wiring a [`Config`] and an [`Application`]
//! into [`Manager::run`], in the shape of `kjpgit-mudpie/src/bin/demo.rs`:
//! an index page, a page that echoes the request environment back to the
//! client, and a page that panics to demonstrate per-request isolation.

use std::sync::Arc;

use preforkd::app::Application;
use preforkd::config::Config;
use preforkd::environ::Environment;
use preforkd::http::StartResponse;
use preforkd::manager::Manager;

fn to_html(body: String) -> String {
    format!("<html><body>{body}</body></html>")
}

struct DemoApp;

impl Application for DemoApp {
    fn call(&self, env: Environment, respond: &mut StartResponse) -> Vec<Vec<u8>> {
        match env.path_info.as_slice() {
            b"/" => index_page(respond),
            b"/hello" => hello_page(&env, respond),
            b"/panic" => panic!("I can't go on!"),
            _ => not_found_page(respond),
        }
    }
}

fn index_page(respond: &mut StartResponse) -> Vec<Vec<u8>> {
    let mut page = String::new();
    page.push_str("<h1>Available Resources</h1><ul>");
    page.push_str("<li><a href=\"/hello?foo=bar\">/hello</a> Shows the request environment");
    page.push_str("<li><a href=\"/panic\">/panic</a> Simulates a crash");
    page.push_str("</ul>");
    respond.start(
        "200 OK",
        vec![("Content-Type".to_string(), "text/html".to_string())],
    );
    vec![to_html(page).into_bytes()]
}

fn hello_page(env: &Environment, respond: &mut StartResponse) -> Vec<Vec<u8>> {
    let mut page = String::new();
    page.push_str("<h1>Hello World!</h1><pre>Request Environment:\n\n");
    page.push_str(&format!("REQUEST_METHOD = {}\n", env.request_method));
    page.push_str(&format!(
        "PATH_INFO = {}\n",
        String::from_utf8_lossy(&env.path_info)
    ));
    page.push_str(&format!(
        "QUERY_STRING = {}\n",
        String::from_utf8_lossy(&env.query_string)
    ));
    page.push_str(&format!("REMOTE_ADDR = {}\n", env.remote_addr));

    let mut headers: Vec<(&String, &String)> = env.headers.iter().collect();
    headers.sort();
    for (k, v) in headers {
        page.push_str(&format!("{k} = {v}\n"));
    }
    page.push_str("</pre>");

    respond.start(
        "200 OK",
        vec![
            ("Content-Type".to_string(), "text/html".to_string()),
            ("X-Preforkd-Example".to_string(), "fi fi fo fum".to_string()),
        ],
    );
    vec![to_html(page).into_bytes()]
}

fn not_found_page(respond: &mut StartResponse) -> Vec<Vec<u8>> {
    respond.start(
        "404 Not Found",
        vec![("Content-Type".to_string(), "text/plain".to_string())],
    );
    vec![b"not found".to_vec()]
}

fn main() {
    preforkd::logging::init_tracing();

    let config = Config::builder()
        .listen(preforkd::config::Listen::Tcp {
            host: "127.0.0.1".to_string(),
            port: 8000,
        })
        .worker_processes(4)
        .build()
        .expect("invalid configuration");

    let manager = Manager::new(config, Arc::new(DemoApp)).expect("failed to start manager");
    manager.run();
}
