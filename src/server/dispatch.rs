//! Request dispatch into the application.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::application::Application;
use crate::error::{AbciError, Result};
use crate::types::{Request, Response, ResponseEcho, ResponseFlush};

/// Run one request against the application.
///
/// Echo and Flush are answered here. A panic inside the application is
/// caught and returned as [`AbciError::ApplicationPanic`]; the caller still
/// holds (and releases) the application lock normally.
pub(crate) fn handle_request<A: Application>(app: &mut A, request: Request) -> Result<Response> {
    catch_unwind(AssertUnwindSafe(|| dispatch(app, request)))
        .map_err(|payload| AbciError::ApplicationPanic(panic_message(payload.as_ref())))
}

fn dispatch<A: Application>(app: &mut A, request: Request) -> Response {
    match request {
        Request::Echo(r) => Response::Echo(ResponseEcho { message: r.message }),
        Request::Flush(_) => Response::Flush(ResponseFlush {}),
        Request::Info(r) => Response::Info(app.info(r)),
        Request::SetOption(r) => Response::SetOption(app.set_option(r)),
        Request::InitChain(r) => Response::InitChain(app.init_chain(r)),
        Request::Query(r) => Response::Query(app.query(r)),
        Request::BeginBlock(r) => Response::BeginBlock(app.begin_block(r)),
        Request::CheckTx(r) => Response::CheckTx(app.check_tx(r)),
        Request::DeliverTx(r) => Response::DeliverTx(app.deliver_tx(r)),
        Request::EndBlock(r) => Response::EndBlock(app.end_block(r)),
        Request::Commit(r) => Response::Commit(app.commit(r)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RequestCommit, RequestDeliverTx, RequestInfo, ResponseCommit, ResponseInfo};
    use bytes::Bytes;

    #[derive(Default)]
    struct Recorder {
        delivered: Vec<Bytes>,
    }

    impl Application for Recorder {
        fn info(&mut self, _request: RequestInfo) -> ResponseInfo {
            ResponseInfo {
                data: "recorder".to_string(),
                ..Default::default()
            }
        }

        fn deliver_tx(&mut self, request: RequestDeliverTx) -> crate::types::ResponseDeliverTx {
            if request.tx.as_ref() == b"panic" {
                panic!("refusing tx");
            }
            self.delivered.push(request.tx);
            Default::default()
        }
    }

    #[test]
    fn test_echo_and_flush_bypass_application() {
        let mut app = Recorder::default();

        let echo = handle_request(&mut app, Request::echo("ping")).unwrap();
        assert_eq!(
            echo,
            Response::Echo(ResponseEcho {
                message: "ping".to_string()
            })
        );

        let flush = handle_request(&mut app, Request::flush()).unwrap();
        assert!(flush.is_flush());
    }

    #[test]
    fn test_routes_to_application() {
        let mut app = Recorder::default();

        let info = handle_request(&mut app, Request::Info(RequestInfo::default())).unwrap();
        assert!(matches!(info, Response::Info(ref r) if r.data == "recorder"));

        let commit = handle_request(&mut app, Request::Commit(RequestCommit {})).unwrap();
        assert_eq!(commit, Response::Commit(ResponseCommit::default()));
    }

    #[test]
    fn test_duplicate_transactions_are_delivered() {
        let mut app = Recorder::default();
        for _ in 0..3 {
            handle_request(&mut app, Request::DeliverTx(RequestDeliverTx::new(&b"same"[..]))).unwrap();
        }
        assert_eq!(app.delivered.len(), 3);
    }

    #[test]
    fn test_panic_is_caught() {
        let mut app = Recorder::default();
        let result = handle_request(&mut app, Request::DeliverTx(RequestDeliverTx::new(&b"panic"[..])));

        match result {
            Err(AbciError::ApplicationPanic(msg)) => assert_eq!(msg, "refusing tx"),
            other => panic!("expected panic error, got {:?}", other),
        }

        // Application still usable afterwards.
        handle_request(&mut app, Request::DeliverTx(RequestDeliverTx::new(&b"ok"[..]))).unwrap();
        assert_eq!(app.delivered.len(), 1);
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(owned.as_ref()), "code 7");

        let other: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
