#[cfg(test)]
mod tests {
	use futures::future::FutureExt;
	use futures::StreamExt;
	use monitor_client::transport::{InMemTransport, StreamFeed};
	use monitor_client::{ClientConfig, ClientError, Code, CommandResponse, Metadata, MonitorClient, RpcError, StatusInfo, StreamEvent, StreamHandle, StreamState};
	use serde_json::json;
	use std::sync::{Arc, Mutex};
	use std::time::Duration;
	use tokio::sync::Notify;
	use tokio::time::timeout;

	const WAIT: Duration = Duration::from_secs(1);

	async fn subscribed(client: &MonitorClient, transport: &InMemTransport) -> (StreamHandle, StreamFeed) {
		let handle = client.subscribe().unwrap();
		let feed = timeout(WAIT, transport.next_stream()).await.unwrap().unwrap();
		(handle, feed)
	}

	fn setup() -> (MonitorClient, InMemTransport) {
		let transport = InMemTransport::new();
		let client = MonitorClient::with_transport(transport.clone(), ClientConfig::default()).unwrap();
		(client, transport)
	}

	fn headers() -> StatusInfo {
		StatusInfo::Headers(Metadata::from([("content-type".to_string(), "application/grpc".to_string())]))
	}

	async fn next(handle: &mut StreamHandle) -> Option<StreamEvent> {
		timeout(WAIT, handle.next_event()).await.unwrap()
	}

	#[tokio::test]
	async fn test_subscribe_returns_open_handle() {
		let (client, transport) = setup();
		let (handle, _feed) = subscribed(&client, &transport).await;

		assert_eq!(handle.state(), StreamState::Open);
		assert_eq!(transport.stream_calls(), 1);
	}

	#[tokio::test]
	async fn test_events_arrive_in_order_then_end() {
		let (client, transport) = setup();
		let (mut handle, feed) = subscribed(&client, &transport).await;

		assert!(feed.status(headers()).await);
		assert!(feed.data(json!({ "id": 1, "name": "Networker" })).await);
		assert!(feed.data(json!({ "id": 2, "name": "Scheduler" })).await);
		feed.end();

		assert_eq!(next(&mut handle).await, Some(StreamEvent::StatusChange(headers())));
		assert_eq!(next(&mut handle).await, Some(StreamEvent::Data(json!({ "id": 1, "name": "Networker" }).into())));
		assert_eq!(next(&mut handle).await, Some(StreamEvent::Data(json!({ "id": 2, "name": "Scheduler" }).into())));
		assert_eq!(next(&mut handle).await, Some(StreamEvent::End));
		assert_eq!(next(&mut handle).await, None);
		assert_eq!(handle.state(), StreamState::Closed);
	}

	#[tokio::test]
	async fn test_stream_error_is_terminal() {
		let (client, transport) = setup();
		let (mut handle, feed) = subscribed(&client, &transport).await;

		assert!(feed.data(json!(1)).await);
		assert!(feed.fail(RpcError::unavailable("worker went away")).await);

		assert_eq!(next(&mut handle).await, Some(StreamEvent::Data(json!(1).into())));
		assert_eq!(next(&mut handle).await, Some(StreamEvent::Error(RpcError::unavailable("worker went away"))));
		assert_eq!(next(&mut handle).await, None);
		assert_eq!(handle.state(), StreamState::Failed);
	}

	#[tokio::test]
	async fn test_failure_to_open_is_delivered_as_error_event() {
		let (client, transport) = setup();
		transport.fail_next_stream(RpcError::new(Code::PermissionDenied, "not allowed"));

		let mut handle = client.subscribe().unwrap();

		match next(&mut handle).await {
			Some(StreamEvent::Error(error)) => assert_eq!(error.code, Code::PermissionDenied),
			other => panic!("Expected error event, got {other:?}"),
		}
		assert_eq!(next(&mut handle).await, None);
		assert_eq!(handle.state(), StreamState::Failed);
	}

	#[tokio::test]
	async fn test_cancel_stops_delivery_and_server_stream() {
		let (client, transport) = setup();
		let (mut handle, feed) = subscribed(&client, &transport).await;

		assert!(feed.data(json!(1)).await);
		assert_eq!(next(&mut handle).await, Some(StreamEvent::Data(json!(1).into())));

		assert!(handle.cancel());
		assert_eq!(handle.state(), StreamState::Closed);
		assert_eq!(next(&mut handle).await, None);

		timeout(WAIT, feed.closed()).await.unwrap();
		assert!(!feed.data(json!(2)).await);
	}

	#[tokio::test]
	async fn test_cancel_after_end_keeps_closed_state() {
		let (client, transport) = setup();
		let (mut handle, feed) = subscribed(&client, &transport).await;
		feed.end();

		assert_eq!(next(&mut handle).await, Some(StreamEvent::End));
		assert!(!handle.cancel());
		assert_eq!(handle.state(), StreamState::Closed);
	}

	#[tokio::test]
	async fn test_dropping_handle_cancels_subscription() {
		let (client, transport) = setup();
		let (handle, feed) = subscribed(&client, &transport).await;

		drop(handle);

		timeout(WAIT, feed.closed()).await.unwrap();
		assert_eq!(client.connection_info().active_subscriptions, 0);
	}

	#[tokio::test]
	async fn test_close_closes_open_handles() {
		let (client, transport) = setup();
		let (mut handle, feed) = subscribed(&client, &transport).await;

		assert!(feed.status(headers()).await);
		assert!(feed.data(json!({ "id": 1 })).await);
		assert_eq!(next(&mut handle).await, Some(StreamEvent::StatusChange(headers())));
		assert_eq!(next(&mut handle).await, Some(StreamEvent::Data(json!({ "id": 1 }).into())));

		client.close();

		assert_eq!(handle.state(), StreamState::Closed);
		assert_eq!(next(&mut handle).await, None);
		timeout(WAIT, feed.closed()).await.unwrap();
	}

	#[tokio::test]
	async fn test_stalled_command_does_not_block_stream() {
		let release = Arc::new(Notify::new());
		let transport = InMemTransport::with_unary_handler({
			let release = Arc::clone(&release);
			move |request| {
				let release = Arc::clone(&release);
				async move {
					release.notified().await;
					Ok(CommandResponse {
						success: true,
						message: request.message,
					})
				}
			}
		});
		let client = MonitorClient::with_transport(transport.clone(), ClientConfig::default()).unwrap();

		let (mut handle, feed) = subscribed(&client, &transport).await;
		let command = tokio::spawn({
			let client = client.clone();
			async move { client.send_text("Hello World!", "").await }
		});

		assert!(feed.data(json!({ "id": 1 })).await);
		assert_eq!(next(&mut handle).await, Some(StreamEvent::Data(json!({ "id": 1 }).into())));
		assert!(!command.is_finished());

		release.notify_one();
		let response = timeout(WAIT, command).await.unwrap().unwrap().unwrap();
		assert_eq!(response.message, "Hello World!");
	}

	#[tokio::test]
	async fn test_subscriptions_are_independent() {
		let (client, transport) = setup();
		let (mut first, first_feed) = subscribed(&client, &transport).await;
		let (mut second, second_feed) = subscribed(&client, &transport).await;

		assert!(first_feed.fail(RpcError::internal("boom")).await);
		assert!(second_feed.data(json!("still here")).await);

		assert!(matches!(next(&mut first).await, Some(StreamEvent::Error(_))));
		assert_eq!(next(&mut second).await, Some(StreamEvent::Data(json!("still here").into())));
		assert_eq!(second.state(), StreamState::Open);
	}

	#[tokio::test]
	async fn test_collect_data_gathers_until_end() {
		let (client, transport) = setup();
		let (handle, feed) = subscribed(&client, &transport).await;

		tokio::spawn(async move {
			feed.status(headers()).await;
			for id in 0..3 {
				feed.data(json!({ "id": id })).await;
			}
			feed.end();
		});

		let items = timeout(WAIT, handle.collect_data()).await.unwrap().unwrap();
		let ids: Vec<i64> = items.iter().filter_map(|item| item.payload()["id"].as_i64()).collect();
		assert_eq!(ids, vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn test_collect_data_reports_stream_error() {
		let (client, transport) = setup();
		let (handle, feed) = subscribed(&client, &transport).await;
		assert!(feed.fail(RpcError::unavailable("down")).await);

		let err = timeout(WAIT, handle.collect_data()).await.unwrap().unwrap_err();
		assert_eq!(err, ClientError::Rpc(RpcError::unavailable("down")));
	}

	#[tokio::test]
	async fn test_handle_is_a_stream() {
		let (client, transport) = setup();
		let (handle, feed) = subscribed(&client, &transport).await;

		assert!(feed.data(json!(1)).await);
		feed.end();

		let events: Vec<StreamEvent> = timeout(WAIT, handle.collect()).await.unwrap();
		assert_eq!(events, vec![StreamEvent::Data(json!(1).into()), StreamEvent::End]);
	}

	#[tokio::test]
	async fn test_for_each_event_sees_every_event() {
		let (client, transport) = setup();
		let (handle, feed) = subscribed(&client, &transport).await;

		assert!(feed.data(json!("a")).await);
		assert!(feed.fail(RpcError::internal("stop")).await);

		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		timeout(
			WAIT,
			handle.for_each_event(move |event| {
				sink.lock().unwrap().push(event);
				async {}.boxed()
			}),
		)
		.await
		.unwrap();

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert!(seen[1].is_terminal());
	}
}
