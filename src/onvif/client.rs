//! ONVIF device/media client
//!
//! Plain SOAP 1.2 over HTTP. Each call builds an envelope, posts it and scans
//! the response for the elements it needs.

use super::soap;
use super::types::{
    DeviceCapabilities, MediaProfile, MediaUri, SourceError, StreamType, TransportProtocol,
};
use crate::recorder::StreamSource;
use async_trait::async_trait;
use std::time::Duration;

const DEVICE_WSDL: &str = "http://www.onvif.org/ver10/device/wsdl";
const MEDIA_WSDL: &str = "http://www.onvif.org/ver10/media/wsdl";

/// Client for the device and media services of a camera
#[derive(Debug, Clone)]
pub struct OnvifClient {
    http: reqwest::Client,
}

impl OnvifClient {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Device service endpoint for a camera address (`host` or `host:port`)
    pub fn device_service_url(address: &str) -> String {
        format!("http://{}/onvif/device_service", address)
    }

    /// `GetCapabilities` with category `All`
    pub async fn capabilities(&self, address: &str) -> Result<DeviceCapabilities, SourceError> {
        let body = "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>";
        let response = self
            .call(
                &Self::device_service_url(address),
                &format!("{}/GetCapabilities", DEVICE_WSDL),
                body,
            )
            .await?;

        let capabilities = soap::first(&response, "Capabilities")
            .ok_or_else(|| SourceError::Malformed("no Capabilities element".to_string()))?;
        let xaddr = |section: &str| {
            capabilities
                .child(section)
                .and_then(|s| s.child_text("XAddr"))
                .filter(|s| !s.is_empty())
        };

        Ok(DeviceCapabilities {
            device_xaddr: xaddr("Device"),
            media_xaddr: xaddr("Media"),
            ptz_xaddr: xaddr("PTZ"),
            events_xaddr: xaddr("Events"),
            imaging_xaddr: xaddr("Imaging"),
            analytics_xaddr: xaddr("Analytics"),
        })
    }

    /// Address of the media service advertised by the device
    pub async fn media_xaddr(&self, address: &str) -> Result<String, SourceError> {
        self.capabilities(address)
            .await?
            .media_xaddr
            .ok_or(SourceError::MissingService("media"))
    }

    /// `GetProfiles` on the media service
    pub async fn profiles(&self, address: &str) -> Result<Vec<MediaProfile>, SourceError> {
        let media = self.media_xaddr(address).await?;
        let response = self
            .call(
                &media,
                &format!("{}/GetProfiles", MEDIA_WSDL),
                "<trt:GetProfiles/>",
            )
            .await?;

        let profiles = soap::elements(&response, "Profiles")
            .into_iter()
            .filter_map(|p| {
                let token = p.attr("token")?;
                let resolution = p.child("Resolution");
                Some(MediaProfile {
                    token,
                    name: p.child_text("Name").unwrap_or_default(),
                    encoding: p.child_text("Encoding"),
                    width: resolution
                        .and_then(|r| r.child_text("Width"))
                        .and_then(|w| w.parse().ok()),
                    height: resolution
                        .and_then(|r| r.child_text("Height"))
                        .and_then(|h| h.parse().ok()),
                })
            })
            .collect();

        Ok(profiles)
    }

    /// `GetStreamUri` for one profile
    pub async fn stream_uri(
        &self,
        address: &str,
        profile_token: &str,
        stream_type: StreamType,
        transport: TransportProtocol,
    ) -> Result<MediaUri, SourceError> {
        let media = self.media_xaddr(address).await?;
        let body = format!(
            concat!(
                "<trt:GetStreamUri>",
                "<trt:StreamSetup>",
                "<tt:Stream>{}</tt:Stream>",
                "<tt:Transport><tt:Protocol>{}</tt:Protocol></tt:Transport>",
                "</trt:StreamSetup>",
                "<trt:ProfileToken>{}</trt:ProfileToken>",
                "</trt:GetStreamUri>"
            ),
            stream_type.onvif_name(),
            transport.onvif_name(),
            soap::escape(profile_token),
        );

        let response = self
            .call(&media, &format!("{}/GetStreamUri", MEDIA_WSDL), &body)
            .await?;
        parse_media_uri(&response)
    }

    async fn call(&self, url: &str, action: &str, body: &str) -> Result<String, SourceError> {
        tracing::debug!("SOAP {} -> {}", action, url);

        let response = self
            .http
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!(r#"application/soap+xml; charset=utf-8; action="{}""#, action),
            )
            .body(soap::envelope(body))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if let Some(reason) = soap::fault_reason(&text) {
            return Err(SourceError::Fault(reason));
        }
        if !status.is_success() {
            return Err(SourceError::Http(format!("{} returned {}", url, status)));
        }

        Ok(text)
    }
}

fn parse_media_uri(response: &str) -> Result<MediaUri, SourceError> {
    let media_uri = soap::first(response, "MediaUri")
        .ok_or_else(|| SourceError::Malformed("no MediaUri element".to_string()))?;
    let uri = media_uri
        .child_text("Uri")
        .filter(|u| !u.is_empty())
        .ok_or_else(|| SourceError::Malformed("empty stream uri".to_string()))?;

    let flag = |name: &str| {
        media_uri
            .child_text(name)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };

    Ok(MediaUri {
        uri,
        invalid_after_connect: flag("InvalidAfterConnect"),
        invalid_after_reboot: flag("InvalidAfterReboot"),
        timeout: media_uri.child_text("Timeout"),
    })
}

#[async_trait]
impl StreamSource for OnvifClient {
    async fn resolve(
        &self,
        address: &str,
        profile_token: &str,
        stream_type: StreamType,
        transport: TransportProtocol,
    ) -> Result<String, SourceError> {
        self.stream_uri(address, profile_token, stream_type, transport)
            .await
            .map(|m| m.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn capabilities_xml(media: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope">
<SOAP-ENV:Body><tds:GetCapabilitiesResponse><tds:Capabilities>
<tt:Device><tt:XAddr>http://cam/onvif/device_service</tt:XAddr></tt:Device>
<tt:Events><tt:XAddr>http://cam/onvif/events</tt:XAddr></tt:Events>
<tt:Media><tt:XAddr>{}</tt:XAddr><tt:StreamingCapabilities/></tt:Media>
</tds:Capabilities></tds:GetCapabilitiesResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
            media
        )
    }

    const STREAM_URI: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body>
<trt:GetStreamUriResponse><trt:MediaUri>
<tt:Uri>rtsp://10.0.0.5:554/Streaming/Channels/101?transportmode=unicast&amp;profile=Profile_1</tt:Uri>
<tt:InvalidAfterConnect>false</tt:InvalidAfterConnect>
<tt:InvalidAfterReboot>true</tt:InvalidAfterReboot>
<tt:Timeout>PT60S</tt:Timeout>
</trt:MediaUri></trt:GetStreamUriResponse></s:Body></s:Envelope>"#;

    async fn camera() -> MockServer {
        let server = MockServer::start().await;
        let media = format!("{}/onvif/media_service", server.uri());

        Mock::given(method("POST"))
            .and(path("/onvif/device_service"))
            .and(body_string_contains("GetCapabilities"))
            .respond_with(ResponseTemplate::new(200).set_body_string(capabilities_xml(&media)))
            .mount(&server)
            .await;

        server
    }

    #[test]
    fn test_parse_media_uri() {
        let uri = parse_media_uri(STREAM_URI).unwrap();
        assert_eq!(
            uri.uri,
            "rtsp://10.0.0.5:554/Streaming/Channels/101?transportmode=unicast&profile=Profile_1"
        );
        assert!(!uri.invalid_after_connect);
        assert!(uri.invalid_after_reboot);
        assert_eq!(uri.timeout.as_deref(), Some("PT60S"));
    }

    #[test]
    fn test_parse_media_uri_missing() {
        let err = parse_media_uri("<s:Envelope><s:Body/></s:Envelope>").unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_capabilities() {
        let server = camera().await;
        let client = OnvifClient::new(Duration::from_secs(5)).unwrap();

        let caps = client.capabilities(&server.address().to_string()).await.unwrap();
        assert_eq!(caps.device_xaddr.as_deref(), Some("http://cam/onvif/device_service"));
        assert_eq!(caps.media_xaddr, Some(format!("{}/onvif/media_service", server.uri())));
        assert!(caps.ptz_xaddr.is_none());
    }

    #[tokio::test]
    async fn test_resolve_stream_uri() {
        let server = camera().await;
        Mock::given(method("POST"))
            .and(path("/onvif/media_service"))
            .and(body_string_contains("<tt:Stream>RTP-Unicast</tt:Stream>"))
            .and(body_string_contains("<tt:Protocol>RTSP</tt:Protocol>"))
            .and(body_string_contains("<trt:ProfileToken>Profile_1</trt:ProfileToken>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(STREAM_URI))
            .expect(1)
            .mount(&server)
            .await;

        let client = OnvifClient::new(Duration::from_secs(5)).unwrap();
        let uri = client
            .resolve(
                &server.address().to_string(),
                "Profile_1",
                StreamType::Unicast,
                TransportProtocol::Rtsp,
            )
            .await
            .unwrap();
        assert!(uri.starts_with("rtsp://10.0.0.5:554/"));
    }

    #[tokio::test]
    async fn test_profiles() {
        let server = camera().await;
        let body = r#"<s:Envelope><s:Body><trt:GetProfilesResponse>
<trt:Profiles token="Profile_1"><tt:Name>main</tt:Name>
<tt:VideoEncoderConfiguration><tt:Encoding>H264</tt:Encoding>
<tt:Resolution><tt:Width>2560</tt:Width><tt:Height>1440</tt:Height></tt:Resolution>
</tt:VideoEncoderConfiguration></trt:Profiles>
<trt:Profiles token="Profile_2"><tt:Name>sub</tt:Name></trt:Profiles>
</trt:GetProfilesResponse></s:Body></s:Envelope>"#;
        Mock::given(method("POST"))
            .and(path("/onvif/media_service"))
            .and(body_string_contains("GetProfiles"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = OnvifClient::new(Duration::from_secs(5)).unwrap();
        let profiles = client.profiles(&server.address().to_string()).await.unwrap();

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].token, "Profile_1");
        assert_eq!(profiles[0].width, Some(2560));
        assert_eq!(profiles[0].encoding.as_deref(), Some("H264"));
        assert_eq!(profiles[1].name, "sub");
        assert_eq!(profiles[1].height, None);
    }

    #[tokio::test]
    async fn test_soap_fault_is_reported() {
        let server = MockServer::start().await;
        let fault = r#"<s:Envelope><s:Body><s:Fault><s:Reason><s:Text>Sender not Authorized</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#;
        Mock::given(method("POST"))
            .and(path("/onvif/device_service"))
            .respond_with(ResponseTemplate::new(400).set_body_string(fault))
            .mount(&server)
            .await;

        let client = OnvifClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .capabilities(&server.address().to_string())
            .await
            .unwrap_err();
        match err {
            SourceError::Fault(reason) => assert_eq!(reason, "Sender not Authorized"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        let client = OnvifClient::new(Duration::from_millis(500)).unwrap();
        let err = client.capabilities("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, SourceError::Http(_)));
    }
}
