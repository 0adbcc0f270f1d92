//! Unit tests for release discovery and the FTP listing client.

use std::net::SocketAddr;
use std::time::Duration;

use rstest::{fixture, rstest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::ftp::{
    parse_extended_passive_port, parse_name_list, parse_passive_port, parse_reply_line,
};
use super::*;
use crate::test_support::{ListingFailure, StaticListing};

const BASE_URL: &str = "ftp://nyftp.netbsd.org/pub/NetBSD-daily/HEAD";

#[fixture]
fn locator() -> ReleaseLocator {
    ReleaseLocator::new(BASE_URL)
}

fn arch(value: &str) -> Architecture {
    Architecture::new(value).expect("valid architecture")
}

#[rstest]
#[tokio::test]
async fn newer_release_without_architecture_is_skipped(locator: ReleaseLocator) {
    let mut listing = StaticListing::new(&["20160101", "20160102"])
        .with_entries("20160101", &["amd64", "i386"])
        .with_entries("20160102", &["i386"]);

    let image = locator
        .find_latest_release(&mut listing, &arch("amd64"))
        .await
        .expect("release found");

    assert_eq!(image.release, "20160101");
    assert_eq!(image.url, format!("{BASE_URL}/20160101/amd64/"));
    assert_eq!(listing.listed(), ["20160102", "20160101"]);
}

#[rstest]
#[tokio::test]
async fn greatest_matching_release_wins(locator: ReleaseLocator) {
    let mut listing = StaticListing::new(&["201801010000Z", "201803010000Z", "201802010000Z"])
        .with_entries("201801010000Z", &["amd64"])
        .with_entries("201802010000Z", &["amd64"])
        .with_entries("201803010000Z", &["amd64"]);

    let image = locator
        .find_latest_release(&mut listing, &arch("amd64"))
        .await
        .expect("release found");

    assert_eq!(image.release, "201803010000Z");
    assert_eq!(listing.listed(), ["201803010000Z"]);
}

#[rstest]
#[tokio::test]
async fn empty_release_listing_is_skipped(locator: ReleaseLocator) {
    let mut listing = StaticListing::new(&["20160101", "20160102"])
        .with_entries("20160101", &["sparc64", "amd64"]);

    let image = locator
        .find_latest_release(&mut listing, &arch("amd64"))
        .await
        .expect("release found");

    assert_eq!(image.release, "20160101");
    assert_eq!(listing.listed(), ["20160102", "20160101"]);
}

#[rstest]
#[tokio::test]
async fn missing_architecture_is_not_found(locator: ReleaseLocator) {
    let mut listing = StaticListing::new(&["20160101", "20160102"])
        .with_entries("20160101", &["i386"])
        .with_entries("20160102", &["sparc64"]);

    let err = locator
        .find_latest_release(&mut listing, &arch("amd64"))
        .await
        .expect_err("no release carries amd64");

    assert!(
        matches!(&err, LocateError::NotFound { architecture } if architecture == "amd64"),
        "unexpected error: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn empty_mirror_is_not_found(locator: ReleaseLocator) {
    let mut listing = StaticListing::new(&[]);

    let err = locator
        .find_latest_release(&mut listing, &arch("amd64"))
        .await
        .expect_err("mirror is empty");

    assert!(matches!(err, LocateError::NotFound { .. }));
}

#[rstest]
#[tokio::test]
async fn listing_failure_is_propagated(locator: ReleaseLocator) {
    let mut listing = StaticListing::new(&["20160101"]).failing_on("20160101");

    let err = locator
        .find_latest_release(&mut listing, &arch("amd64"))
        .await
        .expect_err("listing fails");

    assert!(matches!(
        err,
        LocateError::Listing(ListingFailure { ref path }) if path == "20160101"
    ));
}

#[rstest]
#[case("amd64", "amd64")]
#[case("20160101/amd64", "amd64")]
#[case("20160101/evbarm-earmv7hf/", "evbarm-earmv7hf")]
#[tokio::test]
async fn entry_prefixes_are_stripped_from_urls(
    locator: ReleaseLocator,
    #[case] listed: &str,
    #[case] entry: &str,
) {
    let requested = entry.rsplit('-').next().unwrap_or(entry);
    let mut listing = StaticListing::new(&["20160101"]).with_entries("20160101", &[listed]);

    let image = locator
        .find_latest_release(&mut listing, &arch(requested))
        .await
        .expect("release found");

    assert_eq!(image.entry, entry);
    assert_eq!(image.url, format!("{BASE_URL}/20160101/{entry}/"));
}

#[test]
fn locator_trims_trailing_slash_from_base_url() {
    assert_eq!(ReleaseLocator::new("ftp://m/root/").base_url(), "ftp://m/root");
}

#[rstest]
#[case::dates(&["20160102", "20160101", "20151231"])]
#[case::stamps_with_suffix(&["201802010000Z", "201801010000Z", "20180101"])]
#[case::numeric_width_and_undated(&["100", "99", "010", "9", "latest"])]
fn sort_newest_first_orders_release_names(#[case] expected: &[&str]) {
    let mut names: Vec<String> = expected.iter().rev().map(|name| (*name).to_owned()).collect();
    sort_newest_first(&mut names);
    assert_eq!(names, expected);
}

#[rstest]
#[case("220 Service ready", (220, false, "Service ready"))]
#[case("230-Welcome", (230, true, "Welcome"))]
#[case("226", (226, false, ""))]
fn reply_lines_are_parsed(#[case] line: &str, #[case] expected: (u16, bool, &str)) {
    assert_eq!(parse_reply_line(line).expect("valid reply"), expected);
}

#[rstest]
#[case("hello")]
#[case("22")]
#[case("220_oops")]
fn malformed_reply_lines_are_rejected(#[case] line: &str) {
    assert!(matches!(
        parse_reply_line(line),
        Err(FtpError::MalformedReply { .. })
    ));
}

#[rstest]
#[case("Entering Passive Mode (127,0,0,1,195,80).", 50_000)]
#[case("Entering Passive Mode 10,0,0,1,4,1", 1025)]
fn passive_port_is_extracted(#[case] text: &str, #[case] port: u16) {
    assert_eq!(parse_passive_port(text).expect("valid reply"), port);
}

#[test]
fn passive_reply_without_port_is_rejected() {
    assert!(matches!(
        parse_passive_port("Entering Passive Mode (127,0,0,1)"),
        Err(FtpError::MalformedPassive { .. })
    ));
}

#[rstest]
#[case::bars("Entering Extended Passive Mode (|||6446|)", 6446)]
#[case::other_delimiter("Entering Extended Passive Mode (!!!50000!).", 50_000)]
fn extended_passive_port_is_extracted(#[case] text: &str, #[case] port: u16) {
    assert_eq!(parse_extended_passive_port(text).expect("valid reply"), port);
}

#[rstest]
#[case::no_parentheses("Entering Extended Passive Mode |||6446|")]
#[case::with_address("Entering Extended Passive Mode (|2|::1|6446|)")]
#[case::bad_port("Entering Extended Passive Mode (|||70000|)")]
fn malformed_extended_passive_reply_is_rejected(#[case] text: &str) {
    assert!(matches!(
        parse_extended_passive_port(text),
        Err(FtpError::MalformedPassive { .. })
    ));
}

#[test]
fn name_list_drops_blanks_and_dot_entries() {
    assert_eq!(
        parse_name_list(".\r\n..\r\n20160101\r\n\r\n20160102\r\n"),
        ["20160101", "20160102"]
    );
}

/// Serves a fixed tree over a tiny FTP dialogue on `control`. Like many
/// real servers it refuses `PASV` when the control connection is IPv6.
fn fake_ftp_server(
    control: TcpListener,
    tree: Vec<(&'static str, Vec<&'static str>)>,
) -> (u16, JoinHandle<Vec<String>>) {
    let local = control.local_addr().expect("control addr");
    let port = local.port();

    let handle = tokio::spawn(async move {
        let (stream, _) = control.accept().await.expect("accept control");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut commands = Vec::new();
        let mut data_listener: Option<TcpListener> = None;

        writer
            .write_all(b"220-nyftp.netbsd.org\r\n220 ready\r\n")
            .await
            .expect("greeting");
        while let Ok(Some(line)) = lines.next_line().await {
            commands.push(line.clone());
            let (verb, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let result = match verb {
                "USER" => writer.write_all(b"331 send password\r\n").await,
                "PASS" => writer.write_all(b"230 logged in\r\n").await,
                "CWD" => writer.write_all(b"250 ok\r\n").await,
                "PASV" if local.is_ipv6() => {
                    writer.write_all(b"500 PASV not supported over IPv6\r\n").await
                }
                "PASV" => {
                    let listener = TcpListener::bind(SocketAddr::new(local.ip(), 0))
                        .await
                        .expect("bind data");
                    let data_port = listener.local_addr().expect("data addr").port();
                    data_listener = Some(listener);
                    let reply = format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                        data_port >> 8,
                        data_port & 0xff
                    );
                    writer.write_all(reply.as_bytes()).await
                }
                "EPSV" => {
                    let listener = TcpListener::bind(SocketAddr::new(local.ip(), 0))
                        .await
                        .expect("bind data");
                    let data_port = listener.local_addr().expect("data addr").port();
                    data_listener = Some(listener);
                    let reply = format!("229 Entering Extended Passive Mode (|||{data_port}|)\r\n");
                    writer.write_all(reply.as_bytes()).await
                }
                "NLST" => {
                    let listener = data_listener.take().expect("passive mode before NLST");
                    let (mut data, _) = listener.accept().await.expect("accept data");
                    let names = if argument.is_empty() {
                        tree.iter().map(|(name, _)| *name).collect::<Vec<_>>()
                    } else {
                        tree.iter()
                            .find(|(name, _)| *name == argument)
                            .map(|(_, entries)| entries.clone())
                            .unwrap_or_default()
                    };
                    if names.is_empty() {
                        drop(data);
                        writer.write_all(b"550 No files found\r\n").await
                    } else {
                        writer
                            .write_all(b"150 Opening data connection\r\n")
                            .await
                            .expect("preliminary reply");
                        let payload: String =
                            names.iter().map(|name| format!("{name}\r\n")).collect();
                        data.write_all(payload.as_bytes()).await.expect("payload");
                        drop(data);
                        writer.write_all(b"226 Transfer complete\r\n").await
                    }
                }
                "QUIT" => {
                    writer.write_all(b"221 bye\r\n").await.expect("bye");
                    break;
                }
                _ => writer.write_all(b"502 not implemented\r\n").await,
            };
            result.expect("reply");
        }
        commands
    });
    (port, handle)
}

fn settings(port: u16) -> MirrorSettings {
    settings_for("127.0.0.1", port)
}

fn settings_for(host: &str, port: u16) -> MirrorSettings {
    MirrorSettings {
        host: host.to_owned(),
        port,
        root: String::from("/pub/NetBSD-daily/HEAD"),
        io_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn locate_latest_release_walks_ftp_mirror() {
    let control = TcpListener::bind("127.0.0.1:0").await.expect("bind control");
    let (port, server) = fake_ftp_server(control, vec![
        ("201601010000Z", vec!["201601010000Z/amd64", "201601010000Z/i386"]),
        ("201601020000Z", vec![]),
        ("201601030000Z", vec!["201601030000Z/sparc64"]),
    ]);

    let image = locate_latest_release(&settings(port), &arch("amd64"))
        .await
        .expect("release found");

    assert_eq!(image.release, "201601010000Z");
    assert_eq!(
        image.url,
        format!("ftp://127.0.0.1:{port}/pub/NetBSD-daily/HEAD/201601010000Z/amd64/")
    );

    let commands = server.await.expect("server task");
    let listed: Vec<&str> = commands
        .iter()
        .filter(|command| command.starts_with("NLST"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        listed,
        [
            "NLST",
            "NLST 201601030000Z",
            "NLST 201601020000Z",
            "NLST 201601010000Z"
        ]
    );
    assert_eq!(commands.first().map(String::as_str), Some("USER anonymous"));
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn locate_latest_release_uses_extended_passive_mode_over_ipv6() {
    let Ok(control) = TcpListener::bind("[::1]:0").await else {
        // Host has no IPv6 loopback.
        return;
    };
    let (port, server) = fake_ftp_server(control, vec![("201601010000Z", vec!["amd64"])]);

    let image = locate_latest_release(&settings_for("::1", port), &arch("amd64"))
        .await
        .expect("release found over IPv6");

    assert_eq!(
        image.url,
        format!("ftp://[::1]:{port}/pub/NetBSD-daily/HEAD/201601010000Z/amd64/")
    );
    let commands = server.await.expect("server task");
    assert!(commands.iter().any(|command| command == "EPSV"));
    assert!(!commands.iter().any(|command| command == "PASV"));
}

#[tokio::test]
async fn connect_reports_unreachable_mirror() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let err = FtpMirror::connect(&settings(port))
        .await
        .expect_err("nothing listens");

    assert!(matches!(err, FtpError::Io { .. }), "unexpected error: {err:?}");
}
