use crate::wssec::SecurityHeader;
use crate::{NS_SOAP, NS_WCF, NS_WSA};

macro_rules! actions {
    ($($variant:ident),+ $(,)?) => {
        /// Operations of DIAN's `IWcfDianCustomerServices` contract.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Action {
            $($variant),+
        }

        impl Action {
            pub const ALL: &'static [Action] = &[$(Action::$variant),+];

            pub fn name(&self) -> &'static str {
                match self {
                    $(Action::$variant => stringify!($variant)),+
                }
            }

            /// The `wsa:Action` URI.
            pub fn uri(&self) -> &'static str {
                match self {
                    $(Action::$variant => concat!("http://wcf.dian.colombia/IWcfDianCustomerServices/", stringify!($variant))),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|a| a.name() == name)
            }
        }
    };
}

actions! {
    SendBillSync,
    SendBillAsync,
    SendTestSetAsync,
    SendEventUpdateStatus,
    SendNominaSync,
    SendBillAttachmentAsync,
    GetStatus,
    GetStatusZip,
    GetStatusEvent,
    GetNumberingRange,
    GetXmlByDocumentKey,
    GetAcquirer,
    GetExchangeEmails,
    GetReferenceNotes,
    GetDocumentInfo,
}

/// A SOAP 1.2 envelope around a signed security header and a body.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    header: &'a SecurityHeader,
    body: &'a str,
}

impl<'a> Envelope<'a> {
    /// `body` is inserted verbatim; it may use the `wcf` and `soap` prefixes.
    pub fn new(header: &'a SecurityHeader, body: &'a str) -> Self {
        Envelope { header, body }
    }

    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<soap:Envelope xmlns:soap="{soap}" xmlns:wcf="{wcf}">"#,
                r#"<soap:Header xmlns:wsa="{wsa}">{header}</soap:Header>"#,
                r#"<soap:Body>{body}</soap:Body>"#,
                r#"</soap:Envelope>"#,
            ),
            soap = NS_SOAP,
            wcf = NS_WCF,
            wsa = NS_WSA,
            header = self.header.header_content(),
            body = self.body,
        )
    }
}
