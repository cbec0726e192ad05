// tests/pub_sub.rs

use bytes::Bytes;
use rzmq_socket::socket::options;
use rzmq_socket::{Msg, SocketType, Timeout, ZmqError};
mod common;

#[tokio::test]
async fn test_pub_sub_topic_filtering() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let sub = ctx.socket(SocketType::Sub)?;
  let endpoint = common::unique_inproc_endpoint();
  common::bind(&publisher, &endpoint).await?;
  sub.connect(&endpoint)?;
  sub.set_option(options::SUBSCRIBE, Bytes::from_static(b"weather."))?;

  publisher.send([Msg::from_static(b"sports.scores"), Msg::from_static(b"3-1")])?.await?;
  publisher.send([Msg::from_static(b"weather.today"), Msg::from_static(b"sunny")])?.await?;

  let msg = common::recv_timeout(&sub, common::LONG_TIMEOUT).await?;
  assert_eq!(common::payload(&msg), vec![&b"weather.today"[..], &b"sunny"[..]]);
  assert!(matches!(sub.receive_with_timeout(Timeout::Immediate), Err(ZmqError::WouldBlock)));
  Ok(())
}

#[tokio::test]
async fn test_pub_sub_unsubscribe_and_subscribe_all() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let sub = ctx.socket(SocketType::Sub)?;
  let endpoint = common::unique_inproc_endpoint();
  common::bind(&publisher, &endpoint).await?;
  sub.connect(&endpoint)?;

  sub.set_option(options::SUBSCRIBE, Bytes::from_static(b"a"))?;
  sub.set_option(options::UNSUBSCRIBE, Bytes::from_static(b"a"))?;
  publisher.send([Msg::from_static(b"a1")])?.await?;
  assert!(matches!(sub.receive_with_timeout(Timeout::Immediate), Err(ZmqError::WouldBlock)));

  sub.set_option(options::SUBSCRIBE, Bytes::new())?;
  publisher.send([Msg::from_static(b"anything")])?.await?;
  assert_eq!(common::recv_timeout(&sub, common::LONG_TIMEOUT).await?[0].data(), b"anything");
  Ok(())
}

#[tokio::test]
async fn test_pub_without_subscribers_never_blocks() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  assert!(publisher.is_writable());
  for _ in 0..10 {
    assert!(publisher.send([Msg::from_static(b"dropped")])?.is_immediate());
  }
  assert!(matches!(publisher.receive(), Err(ZmqError::InvalidSocketType(_))));
  Ok(())
}

#[tokio::test]
async fn test_pub_drops_for_full_subscriber() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let publisher = ctx.socket(SocketType::Pub)?;
  let sub = ctx.socket(SocketType::Sub)?;
  publisher.set_option(options::SNDHWM, 1i32)?;
  sub.set_option(options::RCVHWM, 1i32)?;
  let endpoint = common::unique_inproc_endpoint();
  common::bind(&publisher, &endpoint).await?;
  sub.connect(&endpoint)?;
  sub.set_option(options::SUBSCRIBE, Bytes::new())?;

  for i in 0..5u8 {
    publisher.send([Msg::from_vec(vec![i])])?.await?;
  }
  assert_eq!(common::recv_timeout(&sub, common::LONG_TIMEOUT).await?[0].data(), &[0]);
  assert_eq!(common::recv_timeout(&sub, common::LONG_TIMEOUT).await?[0].data(), &[1]);
  assert!(matches!(sub.receive_with_timeout(Timeout::Immediate), Err(ZmqError::WouldBlock)));
  Ok(())
}

#[tokio::test]
async fn test_radio_dish_groups() -> Result<(), ZmqError> {
  let ctx = common::test_context();
  let radio = ctx.socket(SocketType::Radio)?;
  let dish = ctx.socket(SocketType::Dish)?;
  let endpoint = common::unique_inproc_endpoint();
  common::bind(&dish, &endpoint).await?;
  radio.connect(&endpoint)?;
  dish.join("news")?;

  radio.send([Msg::from_static(b"sport"), Msg::from_static(b"goal")])?.await?;
  radio.send([Msg::from_static(b"news"), Msg::from_static(b"headline")])?.await?;
  let msg = common::recv_timeout(&dish, common::LONG_TIMEOUT).await?;
  assert_eq!(common::payload(&msg), vec![&b"news"[..], &b"headline"[..]]);

  dish.leave("news")?;
  assert!(matches!(dish.leave("news"), Err(ZmqError::Native(_))));
  assert!(matches!(radio.join("news"), Err(ZmqError::InvalidSocketType(_))));
  Ok(())
}
